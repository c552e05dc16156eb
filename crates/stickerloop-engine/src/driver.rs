use anyhow::{bail, Result};
use log::{info, warn};
use stickerloop_contracts::journal::{now_utc_iso, JournalEntry};
use stickerloop_contracts::queue::EventQueue;
use stickerloop_contracts::summary::{write_summary, RunSummary};

use crate::orchestrator::{Disposition, Orchestrator};
use crate::services::EngineContext;

/// Drains the queue file batch by batch until it is empty.
pub struct Driver<'a> {
    ctx: &'a EngineContext,
    queue: &'a EventQueue,
}

impl<'a> Driver<'a> {
    pub fn new(ctx: &'a EngineContext, queue: &'a EventQueue) -> Self {
        Self { ctx, queue }
    }

    /// Takes up to `limit` events per batch. Every label of a settled batch
    /// leaves the queue; unproductive ones are parked first.
    pub fn run(&self, limit: usize) -> Result<RunSummary> {
        let limit = limit.max(1);
        let mut summary = RunSummary {
            run_id: self.ctx.journal.run_id().to_string(),
            started_at: now_utc_iso(),
            ..RunSummary::default()
        };
        self.ctx.journal.note(JournalEntry::RunStarted {
            queue: self.queue.path().to_path_buf(),
            limit,
        });

        let orchestrator = Orchestrator::new(self.ctx);
        loop {
            let pending = self.queue.load()?;
            if pending.is_empty() {
                break;
            }
            let batch = pending.into_iter().take(limit).collect::<Vec<_>>();
            info!(
                "batch {}: {}",
                summary.batches + 1,
                batch
                    .iter()
                    .map(|label| label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let report = orchestrator.run_batch(&batch)?;

            let parked = report.labels_with(Disposition::Parked);
            if !parked.is_empty() {
                warn!(
                    "parking {} event(s) in {}",
                    parked.len(),
                    self.queue.failed_path().display()
                );
                self.queue.park_failed(&parked)?;
            }
            if self.queue.remove(&batch)? == 0 {
                bail!(
                    "queue {} did not shrink after a batch; refusing to loop",
                    self.queue.path().display()
                );
            }

            summary.batches += 1;
            summary.events_completed += report.labels_with(Disposition::Completed).len() as u64;
            summary.events_skipped += report.labels_with(Disposition::Skipped).len() as u64;
            summary.events_parked += parked.len() as u64;
            summary.artifacts_written += report.artifacts_written() as u64;
            summary.pipelines_exhausted += report.pipelines_exhausted() as u64;
            summary.pipelines_failed += report.pipelines_failed() as u64;
        }

        summary.finished_at = now_utc_iso();
        write_summary(&self.ctx.config.summary_path(), &summary)?;
        self.ctx.journal.note(JournalEntry::RunFinished {
            batches: summary.batches,
            events_completed: summary.events_completed,
            events_skipped: summary.events_skipped,
            events_parked: summary.events_parked,
            artifacts_written: summary.artifacts_written,
        });
        info!(
            "run {} finished: {} events in {} batches, {} artifacts, {} parked",
            summary.run_id,
            summary.events_settled(),
            summary.batches,
            summary.artifacts_written,
            summary.events_parked
        );
        Ok(summary)
    }
}
