use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::slug::slugify;

/// Header column that names the pending event in the queue file.
pub const QUEUE_LABEL_COLUMN: &str = "day";

/// One pending unit of work. The trimmed label doubles as the queue
/// identifier, so two entries are the same event iff their labels are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventLabel {
    label: String,
}

impl EventLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into().trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    pub fn slug(&self) -> String {
        slugify(&self.label)
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Tabular queue file with a `day` header column.
///
/// Rows are only ever removed by exact label equality. Events that settle
/// without producing anything can be parked in a sibling
/// `<stem>.failed.csv` ledger so they are not silently lost.
#[derive(Debug, Clone)]
pub struct EventQueue {
    path: PathBuf,
}

impl EventQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn failed_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("queue");
        self.path.with_file_name(format!("{stem}.failed.csv"))
    }

    /// All pending labels in file order. A missing file is an empty queue.
    pub fn load(&self) -> Result<Vec<EventLabel>> {
        let Some(raw) = read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let mut rows = raw.lines().filter(|line| !line.trim().is_empty());
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let column = label_column(header);
        Ok(rows
            .filter_map(|line| label_from_row(line, column))
            .collect())
    }

    /// Rewrites the queue without the given labels. Returns the number of
    /// rows dropped.
    pub fn remove(&self, settled: &[EventLabel]) -> Result<usize> {
        if settled.is_empty() {
            return Ok(0);
        }
        let Some(raw) = read_optional(&self.path)? else {
            return Ok(0);
        };
        let settled = settled.iter().collect::<HashSet<_>>();
        let mut rows = raw.lines().filter(|line| !line.trim().is_empty());
        let Some(header) = rows.next() else {
            return Ok(0);
        };
        let column = label_column(header);

        let mut kept = vec![header.to_string()];
        let mut removed = 0;
        for line in rows {
            match label_from_row(line, column) {
                Some(label) if settled.contains(&label) => removed += 1,
                _ => kept.push(line.to_string()),
            }
        }

        let mut body = kept.join("\n");
        body.push('\n');
        fs::write(&self.path, body)
            .with_context(|| format!("failed to rewrite queue {}", self.path.display()))?;
        Ok(removed)
    }

    pub fn append(&self, labels: &[EventLabel]) -> Result<()> {
        append_rows(&self.path, labels)
    }

    pub fn park_failed(&self, labels: &[EventLabel]) -> Result<()> {
        append_rows(&self.failed_path(), labels)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read queue {}", path.display())),
    }
}

fn append_rows(path: &Path, labels: &[EventLabel]) -> Result<()> {
    if labels.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let existing = read_optional(path)?.unwrap_or_default();

    let mut chunk = String::new();
    if existing.trim().is_empty() {
        chunk.push_str(QUEUE_LABEL_COLUMN);
        chunk.push('\n');
    } else if !existing.ends_with('\n') {
        chunk.push('\n');
    }
    for label in labels.iter().filter(|label| !label.is_empty()) {
        chunk.push_str(&csv_field(label.as_str()));
        chunk.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if existing.trim().is_empty() {
        file.set_len(0)?;
    }
    file.write_all(chunk.as_bytes())?;
    Ok(())
}

fn label_column(header: &str) -> usize {
    split_csv_row(header)
        .iter()
        .position(|name| name.trim().eq_ignore_ascii_case(QUEUE_LABEL_COLUMN))
        .unwrap_or(0)
}

fn label_from_row(line: &str, column: usize) -> Option<EventLabel> {
    let fields = split_csv_row(line);
    let label = EventLabel::new(fields.get(column)?.as_str());
    (!label.is_empty()).then_some(label)
}

fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        return format!("\"{}\"", value.replace('"', "\"\""));
    }
    value.to_string()
}
