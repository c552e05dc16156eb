use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Everything a run reports about itself. Serialized with a `type` tag in
/// snake case, e.g. `{"type":"attempt_scored",...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    RunStarted {
        queue: PathBuf,
        limit: usize,
    },
    BatchStarted {
        events: Vec<String>,
    },
    PromptsReady {
        event: String,
        count: usize,
        cached: bool,
    },
    EventSkipped {
        event: String,
        files: usize,
    },
    AttemptScored {
        event: String,
        prompt: String,
        attempt: u32,
        score: Option<u8>,
    },
    ArtifactCreated {
        event: String,
        prompt_index: usize,
        title: String,
        image_path: PathBuf,
        metadata_path: PathBuf,
        score: u8,
        attempt: u32,
    },
    PipelineExhausted {
        event: String,
        prompt_index: usize,
        attempts: u32,
        last_score: Option<u8>,
    },
    /// `prompt_index` is absent when prompt synthesis itself failed.
    PipelineFailed {
        event: String,
        prompt_index: Option<usize>,
        kind: String,
        error: String,
    },
    BatchFinished {
        events: usize,
        pipelines: usize,
        artifacts_written: usize,
        pipelines_exhausted: usize,
        pipelines_failed: usize,
    },
    RunFinished {
        batches: u64,
        events_completed: u64,
        events_skipped: u64,
        events_parked: u64,
        artifacts_written: u64,
    },
}

/// One `journal.jsonl` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub run_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub entry: JournalEntry,
}

/// Append-only run journal shared by every pipeline of a run. The file is
/// opened on the first entry and kept open; clones share the handle.
#[derive(Debug, Clone)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    run_id: String,
    file: Mutex<Option<File>>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                run_id: run_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, entry: JournalEntry) -> Result<()> {
        let record = JournalRecord {
            run_id: self.inner.run_id.clone(),
            ts: now_utc_iso(),
            entry,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut slot = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow!("journal lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.inner.path.display()))?;
        }
        Ok(())
    }

    /// [`Journal::emit`] that only logs a failed write.
    pub fn note(&self, entry: JournalEntry) {
        if let Err(err) = self.emit(entry) {
            warn!("journal write failed: {err:#}");
        }
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.inner.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open journal {}", self.inner.path.display()))
    }
}

/// Every record of a journal file, in write order.
pub fn read_journal(path: &Path) -> Result<Vec<JournalRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{} line {} is not a journal record", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
