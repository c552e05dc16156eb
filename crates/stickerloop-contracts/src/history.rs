use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// One previously emitted record. Membership is exact equality over all
/// three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub description: String,
    pub category: String,
}

impl HistoryRecord {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: category.into(),
        }
    }
}

/// JSON-array history file. Every update is a whole-store
/// read-modify-write held under one lock, shared by all clones.
#[derive(Debug, Clone)]
pub struct DedupHistory {
    inner: Arc<DedupHistoryInner>,
}

#[derive(Debug)]
struct DedupHistoryInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DedupHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DedupHistoryInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Stored records. A missing file is an empty history; an unreadable or
    /// malformed one is an error so it is never silently replaced.
    pub fn load(&self) -> Result<Vec<HistoryRecord>> {
        read_records(&self.inner.path)
    }

    /// Appends `record` unless an identical one is already stored. Returns
    /// whether the store grew.
    pub fn record(&self, record: &HistoryRecord) -> Result<bool> {
        Ok(!self.record_all(std::slice::from_ref(record))?.is_empty())
    }

    /// Appends every candidate not yet present (including duplicates within
    /// `candidates`) and returns the newly stored records in input order.
    pub fn record_all(&self, candidates: &[HistoryRecord]) -> Result<Vec<HistoryRecord>> {
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;

        let mut records = read_records(&self.inner.path)?;
        let mut seen = records.iter().cloned().collect::<HashSet<_>>();
        let mut fresh = Vec::new();
        for candidate in candidates {
            if seen.insert(candidate.clone()) {
                fresh.push(candidate.clone());
            }
        }
        if fresh.is_empty() {
            return Ok(fresh);
        }

        records.extend(fresh.iter().cloned());
        write_records(&self.inner.path, &records)?;
        Ok(fresh)
    }
}

fn read_records(path: &Path) -> Result<Vec<HistoryRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("history {} not found, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read history {}", path.display()))
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("history {} is not a JSON array of records", path.display()))
}

fn write_records(path: &Path, records: &[HistoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(records)?)
        .with_context(|| format!("failed to write history {}", path.display()))?;
    Ok(())
}
