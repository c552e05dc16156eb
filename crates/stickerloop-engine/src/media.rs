use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub fn image_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png")
}

/// Extension for the sniffed format, or `fallback` when the bytes are not a
/// known image.
pub fn image_extension(bytes: &[u8], fallback: &str) -> String {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(fallback)
        .to_string()
}

/// Transport encoding used for vision requests.
pub fn image_data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", image_mime(bytes), BASE64.encode(bytes))
}

pub fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let Some((header, payload)) = uri.split_once(',') else {
        bail!("malformed data URI");
    };
    if !header.ends_with(";base64") {
        bail!("data URI is not base64 encoded");
    }
    BASE64
        .decode(payload.trim().as_bytes())
        .context("data URI base64 decode failed")
}
