use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use stickerloop_contracts::history::{DedupHistory, HistoryRecord};
use stickerloop_contracts::queue::{EventLabel, EventQueue};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntakeReport {
    /// Newly recorded and appended to the queue.
    pub fresh: Vec<HistoryRecord>,
    pub duplicates: Vec<HistoryRecord>,
}

/// Reads a JSON array of `{title, description, category}` candidates.
pub fn load_candidates(path: &Path) -> Result<Vec<HistoryRecord>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read candidates {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("candidates {} are not a JSON array of records", path.display()))
}

/// Records approved candidates in the history and queues the ones not seen
/// before. A title already pending in the queue is not queued twice.
pub fn enqueue_candidates(
    history: &DedupHistory,
    queue: &EventQueue,
    candidates: &[HistoryRecord],
) -> Result<IntakeReport> {
    let fresh = history.record_all(candidates)?;
    let fresh_set = fresh.iter().collect::<HashSet<_>>();
    let duplicates = candidates
        .iter()
        .filter(|candidate| !fresh_set.contains(candidate))
        .cloned()
        .collect::<Vec<_>>();

    let mut pending = queue.load()?.into_iter().collect::<HashSet<_>>();
    let labels = fresh
        .iter()
        .map(|record| EventLabel::new(record.title.as_str()))
        .filter(|label| !label.is_empty() && pending.insert(label.clone()))
        .collect::<Vec<_>>();
    queue.append(&labels)?;
    info!(
        "queued {} new event(s), {} already in history",
        labels.len(),
        duplicates.len()
    );
    Ok(IntakeReport { fresh, duplicates })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use stickerloop_contracts::history::{DedupHistory, HistoryRecord};
    use stickerloop_contracts::queue::{EventLabel, EventQueue};

    use super::{enqueue_candidates, load_candidates};

    #[test]
    fn enqueue_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let history = DedupHistory::new(temp.path().join("holiday_history.json"));
        let queue = EventQueue::new(temp.path().join("days.csv"));
        let candidates = vec![
            HistoryRecord::new("Pi Day", "Celebrates the constant.", "Science"),
            HistoryRecord::new("Tea Day", "Celebrates tea.", "Food"),
        ];

        let first = enqueue_candidates(&history, &queue, &candidates)?;
        let second = enqueue_candidates(&history, &queue, &candidates)?;

        assert_eq!(first.fresh.len(), 2);
        assert!(second.fresh.is_empty());
        assert_eq!(second.duplicates, candidates);
        assert_eq!(
            queue.load()?,
            vec![EventLabel::new("Pi Day"), EventLabel::new("Tea Day")]
        );
        assert_eq!(history.load()?.len(), 2);
        Ok(())
    }

    #[test]
    fn already_queued_title_is_not_appended_again() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let history = DedupHistory::new(temp.path().join("holiday_history.json"));
        let queue = EventQueue::new(temp.path().join("days.csv"));
        fs::write(queue.path(), "day\nPi Day\n")?;

        let report = enqueue_candidates(
            &history,
            &queue,
            &[HistoryRecord::new("Pi Day", "Updated blurb.", "Science")],
        )?;

        assert_eq!(report.fresh.len(), 1);
        assert_eq!(queue.load()?, vec![EventLabel::new("Pi Day")]);
        Ok(())
    }

    #[test]
    fn unreadable_history_aborts_without_queueing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let history_path = temp.path().join("holiday_history.json");
        fs::write(&history_path, "{not an array}")?;
        let history = DedupHistory::new(&history_path);
        let queue = EventQueue::new(temp.path().join("days.csv"));

        let result = enqueue_candidates(
            &history,
            &queue,
            &[HistoryRecord::new("Pi Day", "Maths.", "Science")],
        );

        assert!(result.is_err());
        assert!(queue.load()?.is_empty());
        assert_eq!(fs::read_to_string(&history_path)?, "{not an array}");
        Ok(())
    }

    #[test]
    fn load_candidates_reads_json_array() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("candidates.json");
        fs::write(
            &path,
            r#"[{"title":"Pi Day","description":"Maths.","category":"Science"}]"#,
        )?;

        let candidates = load_candidates(&path)?;

        assert_eq!(candidates, vec![HistoryRecord::new("Pi Day", "Maths.", "Science")]);
        assert!(load_candidates(&temp.path().join("absent.json")).is_err());
        Ok(())
    }
}
