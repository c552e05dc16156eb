use std::path::{Path, PathBuf};

/// Knobs for one engine instance. Built once by the caller and carried in
/// [`crate::EngineContext`]; nothing reads configuration from globals.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Event directories, `journal.jsonl` and `summary.json` live here.
    pub output_root: PathBuf,
    pub text_model: String,
    pub vision_model: String,
    pub image_model: String,
    pub image_size: String,
    pub image_quality: String,
    /// Used when the accepted bytes are not a recognisable image format.
    pub default_image_extension: String,
    pub target_prompt_count: usize,
    pub min_prompt_chars: usize,
    pub max_iterations: u32,
    pub max_score_attempts: u32,
    pub accept_threshold: u8,
    /// Events whose directory holds more files than this are skipped.
    pub artifact_cap: usize,
    /// Pipelines admitted at once; the rest wait in the batch queue.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            text_model: "gpt-4".to_string(),
            vision_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            image_quality: "hd".to_string(),
            default_image_extension: "webp".to_string(),
            target_prompt_count: 3,
            min_prompt_chars: 10,
            max_iterations: 3,
            max_score_attempts: 2,
            accept_threshold: 70,
            artifact_cap: 3,
            max_concurrency: 4,
        }
    }
}

impl EngineConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn journal_path(&self) -> PathBuf {
        self.output_root.join("journal.jsonl")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_root.join("summary.json")
    }

    pub(crate) fn iterations(&self) -> u32 {
        self.max_iterations.max(1)
    }

    pub(crate) fn score_attempts(&self) -> u32 {
        self.max_score_attempts.max(1)
    }
}
