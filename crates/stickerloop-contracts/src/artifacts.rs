use std::error::Error;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::queue::EventLabel;
use crate::slug::slugify;

pub const MAX_TAGS: usize = 15;
pub const MAX_TAG_CHARS: usize = 50;

const LABELS: [&str; 3] = ["title:", "tags:", "description:"];

/// JSON sidecar written next to every accepted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub description: String,
}

impl ArtifactMetadata {
    pub fn slug(&self) -> String {
        slugify(&self.title)
    }
}

/// The metadata response did not carry a usable title, tag list and
/// description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFormatError {
    message: String,
}

impl MetadataFormatError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for MetadataFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized metadata format: {}", self.message)
    }
}

impl Error for MetadataFormatError {}

/// Parses `Title: … Tags: … Description: …` responses.
///
/// Labels are matched case-insensitively and may sit on separate lines or
/// inline. A response with no labels at all is accepted only when it has
/// exactly three non-empty lines, read as title, tags, description.
pub fn parse_metadata_response(text: &str) -> Result<ArtifactMetadata, MetadataFormatError> {
    let lowered = text.to_ascii_lowercase();
    let mut found = LABELS
        .iter()
        .enumerate()
        .filter_map(|(slot, label)| lowered.find(label).map(|pos| (pos, slot, label.len())))
        .collect::<Vec<(usize, usize, usize)>>();

    let mut values: [Option<String>; 3] = [None, None, None];
    if found.is_empty() {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<&str>>();
        if lines.len() != 3 {
            return Err(MetadataFormatError::new(format!(
                "expected labeled fields or three lines, got {} lines",
                lines.len()
            )));
        }
        for (slot, line) in lines.into_iter().enumerate() {
            values[slot] = Some(clean_value(line));
        }
    } else {
        found.sort_unstable();
        for (idx, (pos, slot, len)) in found.iter().enumerate() {
            let end = found
                .get(idx + 1)
                .map(|(next, _, _)| *next)
                .unwrap_or(text.len());
            values[*slot] = Some(clean_value(&text[pos + len..end]));
        }
    }

    let [title, tags, description] = values;
    let title = require(title, "title")?;
    let description = require(description, "description")?;
    let tags = tags
        .ok_or_else(|| MetadataFormatError::new("missing tags"))
        .map(|raw| split_tags(&raw))?;

    Ok(ArtifactMetadata {
        title,
        tags,
        description,
    })
}

fn require(value: Option<String>, field: &str) -> Result<String, MetadataFormatError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MetadataFormatError::new(format!("missing {field}")))
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_matches(|ch: char| ch == '*' || ch == '[' || ch == ']' || ch == '"')
        .trim()
        .to_string()
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.trim().trim_end_matches('.').trim())
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag.chars().take(MAX_TAG_CHARS).collect::<String>())
        .take(MAX_TAGS)
        .collect()
}

/// Paths of one persisted image/sidecar pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub event: EventLabel,
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: ArtifactMetadata,
}

/// One directory per event slug under `root`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn event_dir(&self, event: &EventLabel) -> PathBuf {
        self.root.join(event.slug())
    }

    /// Regular files currently in the event directory (the prompt cache
    /// included). A missing directory counts as zero.
    pub fn file_count(&self, event: &EventLabel) -> usize {
        let Ok(entries) = fs::read_dir(self.event_dir(event)) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .count()
    }

    /// Writes `<title-slug>.<extension>` and `<title-slug>.json`.
    pub fn persist(
        &self,
        event: &EventLabel,
        metadata: &ArtifactMetadata,
        image: &[u8],
        extension: &str,
    ) -> anyhow::Result<StoredArtifact> {
        let dir = self.event_dir(event);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let stem = metadata.slug();
        let image_path = dir.join(format!("{stem}.{}", extension.trim_start_matches('.')));
        let metadata_path = dir.join(format!("{stem}.json"));

        fs::write(&image_path, image)
            .with_context(|| format!("failed to write {}", image_path.display()))?;
        fs::write(&metadata_path, serde_json::to_string(metadata)?)
            .with_context(|| format!("failed to write {}", metadata_path.display()))?;

        Ok(StoredArtifact {
            event: event.clone(),
            image_path,
            metadata_path,
            metadata: metadata.clone(),
        })
    }
}
