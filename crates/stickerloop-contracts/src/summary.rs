use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Totals for one driver run, written as `summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub batches: u64,
    pub events_completed: u64,
    pub events_skipped: u64,
    pub events_parked: u64,
    pub artifacts_written: u64,
    pub pipelines_exhausted: u64,
    pub pipelines_failed: u64,
}

impl RunSummary {
    pub fn events_settled(&self) -> u64 {
        self.events_completed + self.events_skipped + self.events_parked
    }
}

/// Replaces `path` with the pretty-printed summary.
pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("failed to write summary {}", path.display()))
}
