use std::sync::Arc;

use anyhow::Result;
use stickerloop_contracts::artifacts::ArtifactStore;
use stickerloop_contracts::journal::Journal;

use crate::config::EngineConfig;
use crate::dryrun::DryrunClient;
use crate::openai::OpenAiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// `data:<mime>;base64,<payload>`
    ImageDataUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user_with_image(image_data_url: String, text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![
                ContentPart::ImageDataUrl(image_data_url),
                ContentPart::Text(text.into()),
            ],
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::ImageDataUrl(_) => None,
            })
            .collect::<Vec<&str>>()
            .join("\n")
    }

    pub fn image_data_url(&self) -> Option<&str> {
        self.content.iter().find_map(|part| match part {
            ContentPart::ImageDataUrl(url) => Some(url.as_str()),
            ContentPart::Text(_) => None,
        })
    }
}

/// Role-tagged conversation for the text or vision service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|message| message.role == Role::System)
            .map(ChatMessage::text)
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|message| message.role == Role::User)
            .map(ChatMessage::text)
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn image_data_url(&self) -> Option<&str> {
        self.messages.iter().find_map(ChatMessage::image_data_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u32,
}

/// Text generation; also serves vision requests when a message carries an
/// image part.
pub trait ChatService: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Returns a retrievable URI (http(s) or `data:`) for one generated image.
pub trait ImageService: Send + Sync {
    fn generate(&self, request: &ImageGenerationRequest) -> Result<String>;
}

/// Downloads image bytes. Any non-success response is an error.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Everything a pipeline needs, shared read-only by every worker in a batch.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub journal: Journal,
    pub text: Arc<dyn ChatService>,
    pub vision: Arc<dyn ChatService>,
    pub images: Arc<dyn ImageService>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        journal: Journal,
        text: Arc<dyn ChatService>,
        vision: Arc<dyn ChatService>,
        images: Arc<dyn ImageService>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            config,
            journal,
            text,
            vision,
            images,
            fetcher,
        }
    }

    /// One OpenAI client, credentials from the environment, shared by all
    /// four seams.
    pub fn openai(config: EngineConfig, journal: Journal) -> Result<Self> {
        let client = Arc::new(OpenAiClient::from_env()?);
        Ok(Self::new(
            config,
            journal,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
        ))
    }

    pub fn dryrun(config: EngineConfig, journal: Journal) -> Self {
        let client = Arc::new(DryrunClient::new());
        Self::new(
            config,
            journal,
            client.clone(),
            client.clone(),
            client.clone(),
            client,
        )
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.config.output_root.clone())
    }
}
