use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::error::truncate_text;
use crate::media::{decode_data_uri, is_data_uri};
use crate::services::{
    ChatMessage, ChatRequest, ChatService, ContentPart, ImageFetcher, ImageGenerationRequest,
    ImageService,
};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
const VISION_MAX_TOKENS: u64 = 600;

/// Blocking OpenAI transport. One instance is shared by every pipeline.
pub struct OpenAiClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl OpenAiClient {
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("OPENAI_API_KEY")
            .or_else(|| non_empty_env("OPENAI_API_KEY_BACKUP"))
            .ok_or_else(|| anyhow!("OPENAI_API_KEY or OPENAI_API_KEY_BACKUP not set"))?;
        let api_base = env::var("OPENAI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(api_base, api_key)
    }

    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http,
        })
    }

    fn post_json(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        response_json_or_error("OpenAI", response)
    }
}

impl ChatService for OpenAiClient {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        debug!(
            "chat completion model={} messages={}",
            request.model,
            request.messages.len()
        );
        let response = self.post_json(&endpoint, &Value::Object(chat_payload(request)))?;
        extract_chat_text(&response)
    }
}

impl ImageService for OpenAiClient {
    fn generate(&self, request: &ImageGenerationRequest) -> Result<String> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "size": request.size,
            "quality": request.quality,
            "n": request.n.max(1),
        });
        let response = self.post_json(&endpoint, &payload)?;
        extract_image_uri(&response)
    }
}

impl ImageFetcher for OpenAiClient {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if is_data_uri(uri) {
            return decode_data_uri(uri);
        }
        let response = self
            .http
            .get(uri)
            .send()
            .with_context(|| format!("failed downloading image ({})", truncate_text(uri, 96)))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        Ok(response
            .bytes()
            .context("failed reading image bytes")?
            .to_vec())
    }
}

pub(crate) fn chat_payload(request: &ChatRequest) -> Map<String, Value> {
    let has_image = request
        .messages
        .iter()
        .any(|message| message.image_data_url().is_some());
    let mut payload = Map::new();
    payload.insert("model".to_string(), Value::String(request.model.clone()));
    payload.insert(
        "messages".to_string(),
        Value::Array(request.messages.iter().map(message_json).collect()),
    );
    if has_image {
        payload.insert("max_tokens".to_string(), json!(VISION_MAX_TOKENS));
    }
    payload
}

fn message_json(message: &ChatMessage) -> Value {
    let content = match message.content.as_slice() {
        [ContentPart::Text(text)] => Value::String(text.clone()),
        parts => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({"type": "text", "text": text}),
                    ContentPart::ImageDataUrl(url) => {
                        json!({"type": "image_url", "image_url": {"url": url}})
                    }
                })
                .collect(),
        ),
    };
    json!({
        "role": message.role.as_str(),
        "content": content,
    })
}

pub(crate) fn extract_chat_text(response: &Value) -> Result<String> {
    let text = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        bail!("OpenAI chat response carried no message content");
    }
    Ok(text.to_string())
}

/// First image reference of an images response. Inline `b64_json` payloads
/// are surfaced as `data:` URIs so the fetch step stays uniform.
pub(crate) fn extract_image_uri(response: &Value) -> Result<String> {
    let first = response
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("OpenAI response returned no images"))?;
    if let Some(url) = first.get("url").and_then(Value::as_str) {
        return Ok(url.to_string());
    }
    if let Some(b64) = first.get("b64_json").and_then(Value::as_str) {
        return Ok(format!("data:image/png;base64,{b64}"));
    }
    bail!("OpenAI image entry had neither url nor b64_json")
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
