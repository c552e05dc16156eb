use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const PROMPTS_FILE_NAME: &str = "prompts.txt";

/// Leading directive words the text service likes to open prompts with.
pub const BANNED_DIRECTIVES: [&str; 6] = [
    "Illustrate",
    "Design",
    "Create",
    "Make",
    "Illustration:",
    "Design:",
];

/// Cleans raw service lines into prompts.
///
/// Lines shorter than `min_chars` are noise and dropped first. Survivors lose
/// any leading `N.` ordinal and banned directive (plus a trailing `of`). When
/// exactly `2 * target_count` lines remain they are assumed to alternate
/// title/body and only the bodies are kept. Empty results are discarded last.
/// The count is not forced to `target_count` here.
pub fn normalize_prompt_lines<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    target_count: usize,
    min_chars: usize,
) -> Vec<String> {
    let mut kept = lines
        .into_iter()
        .map(str::trim)
        .filter(|line| line.chars().count() >= min_chars)
        .map(strip_leading_markers)
        .collect::<Vec<String>>();

    if target_count > 0 && kept.len() == 2 * target_count {
        kept = kept.into_iter().skip(1).step_by(2).collect();
    }

    kept.into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// True when `line` still opens with an ordinal marker or banned directive.
pub fn has_leading_marker(line: &str) -> bool {
    strip_leading_markers(line) != line.trim()
}

fn strip_leading_markers(line: &str) -> String {
    let mut current = line.trim().to_string();
    loop {
        let next = strip_directive(strip_ordinal(&current));
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_ordinal(line: &str) -> &str {
    let trimmed = line.trim_start();
    let digits = trimmed
        .char_indices()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .count();
    if digits > 0 && trimmed[digits..].starts_with('.') {
        return trimmed[digits + 1..].trim_start();
    }
    trimmed
}

fn strip_directive(line: &str) -> String {
    let words = line.split_whitespace().collect::<Vec<&str>>();
    let Some(first) = words.first() else {
        return String::new();
    };
    if !BANNED_DIRECTIVES.contains(first) {
        return line.trim().to_string();
    }
    let skip = if words.get(1) == Some(&"of") { 2 } else { 1 };
    words[skip..].join(" ")
}

/// `prompts.txt` inside an event directory, one prompt per line.
#[derive(Debug, Clone)]
pub struct PromptCache {
    path: PathBuf,
}

impl PromptCache {
    pub fn new(event_dir: impl AsRef<Path>) -> Self {
        Self {
            path: event_dir.as_ref().join(PROMPTS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached prompts, or `None` when the file is missing or blank. Any
    /// other read failure is an error, not a cache miss.
    pub fn load(&self) -> Result<Option<Vec<String>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read prompt cache {}", self.path.display()))
            }
        };
        let prompts = raw
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<String>>();
        Ok((!prompts.is_empty()).then_some(prompts))
    }

    pub fn store(&self, prompts: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, prompts.join("\n"))
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{has_leading_marker, normalize_prompt_lines, PromptCache};

    #[test]
    fn normalizes_ordinals_directives_and_noise() {
        let raw = [
            "1. Illustrate of a bright garden",
            "ok",
            "A glowing lantern festival at dusk",
        ];
        assert_eq!(
            normalize_prompt_lines(raw, 2, 10),
            vec![
                "a bright garden".to_string(),
                "A glowing lantern festival at dusk".to_string(),
            ]
        );
    }

    #[test]
    fn alternating_title_lines_keep_bodies() {
        let raw = [
            "Theme: Friendship",
            "Two kittens sharing a scarf under falling snow",
            "Theme: Courage",
            "A tiny knight mouse raising a candle like a sword",
            "Theme: Kindness",
            "A hedgehog handing out paper hearts to a crowd",
        ];
        let prompts = normalize_prompt_lines(raw, 3, 10);
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].starts_with("Two kittens"));
        assert!(prompts[2].starts_with("A hedgehog"));
    }

    #[test]
    fn stacked_markers_are_all_removed() {
        let raw = ["12. Design: Create of a paper boat drifting on a rainbow"];
        let prompts = normalize_prompt_lines(raw, 3, 10);
        assert_eq!(prompts, vec!["a paper boat drifting on a rainbow".to_string()]);
        assert!(!has_leading_marker(&prompts[0]));
    }

    #[test]
    fn lines_reduced_to_nothing_are_dropped() {
        let raw = ["Illustration:", "A sun wearing sunglasses on a beach towel"];
        let prompts = normalize_prompt_lines(raw, 3, 10);
        assert_eq!(
            prompts,
            vec!["A sun wearing sunglasses on a beach towel".to_string()]
        );
    }

    #[test]
    fn directive_matching_is_case_sensitive() {
        let raw = ["Makeshift raft of cheerful frogs on a pond"];
        assert_eq!(
            normalize_prompt_lines(raw, 1, 10),
            vec!["Makeshift raft of cheerful frogs on a pond".to_string()]
        );
    }

    #[test]
    fn cache_round_trip_and_blank_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let cache = PromptCache::new(temp.path().join("pizza-day"));
        assert_eq!(cache.load()?, None);

        let prompts = vec!["a slice of joy".to_string(), "a cheesy sunset".to_string()];
        cache.store(&prompts)?;
        assert_eq!(cache.load()?, Some(prompts));

        std::fs::write(cache.path(), "\n  \n")?;
        assert_eq!(cache.load()?, None);
        Ok(())
    }

    #[test]
    fn undecodable_cache_is_an_error_not_a_miss() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let cache = PromptCache::new(temp.path());
        std::fs::write(cache.path(), [0xff_u8, 0xfe, 0xfd])?;

        assert!(cache.load().is_err());
        Ok(())
    }
}
