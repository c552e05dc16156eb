use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::media::{decode_data_uri, is_data_uri};
use crate::services::{ChatRequest, ChatService, ImageFetcher, ImageGenerationRequest, ImageService};

const MAX_DRYRUN_EDGE: u32 = 256;

/// Offline stand-in for all three services. Images are solid colours derived
/// from the prompt, scores and metadata are derived from the image bytes, so
/// a run is reproducible without network access.
#[derive(Default)]
pub struct DryrunClient {
    images: Mutex<HashMap<String, Vec<u8>>>,
    counter: AtomicU64,
}

impl DryrunClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn prompt_lines(&self, request: &ChatRequest) -> String {
        let quantity = request
            .user_text()
            .split_whitespace()
            .find_map(|word| word.parse::<usize>().ok())
            .unwrap_or(3)
            .clamp(1, 12);
        (1..=quantity)
            .map(|idx| {
                format!(
                    "{idx}. Create of a cute die cut sticker showing theme {idx} in warm colours, no border, simple background"
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    fn score(&self, image_data_url: &str) -> String {
        let digest = Sha256::digest(image_data_url.as_bytes());
        (40 + u32::from(digest[0]) % 61).to_string()
    }

    fn metadata(&self, request: &ChatRequest, image_data_url: &str) -> String {
        let event = request
            .user_text()
            .trim()
            .trim_start_matches("This image is for")
            .trim()
            .trim_end_matches('.')
            .trim()
            .to_string();
        let digest = Sha256::digest(image_data_url.as_bytes());
        let id = hex::encode(&digest[..3]);
        let tags = event
            .split_whitespace()
            .map(str::to_lowercase)
            .chain(["sticker".to_string(), "dryrun".to_string()])
            .collect::<Vec<String>>()
            .join(", ");
        format!(
            "Title: Cheerful {event} Sticker {id}\nTags: {tags}\nDescription: A dryrun sticker for {event}."
        )
    }
}

impl ChatService for DryrunClient {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let Some(image_data_url) = request.image_data_url() else {
            return Ok(self.prompt_lines(request));
        };
        if request.system_text().contains("Evaluate") {
            return Ok(self.score(image_data_url));
        }
        Ok(self.metadata(request, image_data_url))
    }
}

impl ImageService for DryrunClient {
    fn generate(&self, request: &ImageGenerationRequest) -> Result<String> {
        let idx = self.counter.fetch_add(1, Ordering::SeqCst);
        let (width, height) = parse_dims(&request.size);
        let (r, g, b) = color_from_prompt(&request.prompt, idx);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun PNG encode failed")?;

        let uri = format!("dryrun://image/{}", short_id(&request.prompt, idx));
        self.images
            .lock()
            .map_err(|_| anyhow!("dryrun image table poisoned"))?
            .insert(uri.clone(), bytes);
        Ok(uri)
    }
}

impl ImageFetcher for DryrunClient {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if is_data_uri(uri) {
            return decode_data_uri(uri);
        }
        let images = self
            .images
            .lock()
            .map_err(|_| anyhow!("dryrun image table poisoned"))?;
        match images.get(uri) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("image download failed (404): unknown dryrun image {uri}"),
        }
    }
}

fn parse_dims(size: &str) -> (u32, u32) {
    let parsed = size
        .split_once('x')
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
    let (width, height) = parsed.unwrap_or((MAX_DRYRUN_EDGE, MAX_DRYRUN_EDGE));
    (
        width.clamp(1, MAX_DRYRUN_EDGE),
        height.clamp(1, MAX_DRYRUN_EDGE),
    )
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}
