use deunicode::deunicode;

/// Filesystem-safe form of a label: transliterated to ASCII, then lowercase
/// alphanumerics joined by single hyphens. Apostrophes are dropped so
/// `Mother's Day` reads `mothers-day`.
pub fn slugify(text: &str) -> String {
    let ascii = deunicode(text);
    let mut out = String::with_capacity(ascii.len());
    let mut pending_hyphen = false;
    for ch in ascii.chars() {
        if matches!(ch, '\'' | '\u{2019}') {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    if out.is_empty() {
        return "untitled".to_string();
    }
    out
}
