use std::fmt;

/// Where a pipeline-fatal failure came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineErrorKind {
    /// Text, image or vision service call failed.
    Upstream,
    /// Generated image could not be downloaded.
    Fetch,
    /// A service answered in a shape we cannot parse.
    UnrecognizedFormat,
    /// Local persistence failed.
    Storage,
    /// The pipeline thread panicked.
    Panicked,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Fetch => "fetch",
            Self::UnrecognizedFormat => "unrecognized_format",
            Self::Storage => "storage",
            Self::Panicked => "panicked",
        }
    }
}

#[derive(Debug)]
pub struct PipelineError {
    kind: PipelineErrorKind,
    message: String,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Fetch, message)
    }

    pub fn unrecognized_format(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::UnrecognizedFormat, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Storage, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Panicked, message)
    }

    pub fn from_anyhow(kind: PipelineErrorKind, err: &anyhow::Error) -> Self {
        Self::new(kind, error_chain_text(err, 512))
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for PipelineError {}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().map(String::as_str) == Some(trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
