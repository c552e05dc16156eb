use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use log::{error, info, warn};
use stickerloop_contracts::artifacts::StoredArtifact;
use stickerloop_contracts::journal::JournalEntry;
use stickerloop_contracts::queue::EventLabel;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{run_pipeline, PipelineJob, PipelineOutcome};
use crate::services::EngineContext;
use crate::synth::PromptSynthesizer;
use crate::writer::{ArtifactSink, ArtifactWriter};

#[derive(Debug)]
pub enum EventStatus {
    /// Directory already held `files` entries, above the cap.
    Skipped { files: usize },
    PromptsFailed(PipelineError),
    /// Every scheduled pipeline has returned.
    Settled,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub prompt_index: usize,
    pub prompt: String,
    pub result: PipelineResult<PipelineOutcome>,
}

#[derive(Debug)]
pub struct EventReport {
    pub event: EventLabel,
    pub status: EventStatus,
    pub pipelines: Vec<PipelineReport>,
}

/// What the queue driver does with an event once its batch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Skipped,
    Parked,
}

impl EventReport {
    pub fn artifacts(&self) -> impl Iterator<Item = &StoredArtifact> {
        self.pipelines
            .iter()
            .filter_map(|report| report.result.as_ref().ok())
            .filter_map(PipelineOutcome::artifact)
    }

    pub fn disposition(&self) -> Disposition {
        match self.status {
            EventStatus::Skipped { .. } => Disposition::Skipped,
            EventStatus::PromptsFailed(_) => Disposition::Parked,
            EventStatus::Settled if self.artifacts().next().is_some() => Disposition::Completed,
            EventStatus::Settled => Disposition::Parked,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn artifacts_written(&self) -> usize {
        self.events.iter().map(|event| event.artifacts().count()).sum()
    }

    pub fn pipelines_exhausted(&self) -> usize {
        self.pipeline_results()
            .filter(|result| matches!(result, Ok(PipelineOutcome::Exhausted { .. })))
            .count()
    }

    pub fn pipelines_failed(&self) -> usize {
        self.pipeline_results().filter(|result| result.is_err()).count()
    }

    pub fn labels_with(&self, disposition: Disposition) -> Vec<EventLabel> {
        self.events
            .iter()
            .filter(|event| event.disposition() == disposition)
            .map(|event| event.event.clone())
            .collect()
    }

    fn pipeline_results(&self) -> impl Iterator<Item = &PipelineResult<PipelineOutcome>> {
        self.events
            .iter()
            .flat_map(|event| event.pipelines.iter().map(|report| &report.result))
    }
}

/// Runs one batch of events to completion.
pub struct Orchestrator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Returns once every pipeline scheduled for `events` has settled.
    pub fn run_batch(&self, events: &[EventLabel]) -> Result<BatchReport> {
        let mut seen = HashSet::new();
        let events = events
            .iter()
            .filter(|event| !event.is_empty() && seen.insert(event.as_str().to_string()))
            .cloned()
            .collect::<Vec<_>>();
        self.ctx.journal.note(JournalEntry::BatchStarted {
            events: events.iter().map(EventLabel::to_string).collect(),
        });

        let mut reports = Vec::with_capacity(events.len());
        let mut jobs = VecDeque::new();
        for event in &events {
            let status = self.prepare(event, &mut jobs);
            reports.push(EventReport {
                event: event.clone(),
                status,
                pipelines: Vec::new(),
            });
        }

        let job_count = jobs.len();
        let mut settled = self.run_jobs(jobs)?;
        settled.sort_by_key(|(job, _)| job.prompt_index);
        for (job, result) in settled {
            if let Some(report) = reports.iter_mut().find(|report| report.event == job.event) {
                report.pipelines.push(PipelineReport {
                    prompt_index: job.prompt_index,
                    prompt: job.prompt,
                    result,
                });
            }
        }

        let report = BatchReport { events: reports };
        info!(
            "batch settled: {} events, {job_count} pipelines, {} artifacts",
            report.events.len(),
            report.artifacts_written()
        );
        self.ctx.journal.note(JournalEntry::BatchFinished {
            events: report.events.len(),
            pipelines: job_count,
            artifacts_written: report.artifacts_written(),
            pipelines_exhausted: report.pipelines_exhausted(),
            pipelines_failed: report.pipelines_failed(),
        });
        Ok(report)
    }

    fn prepare(&self, event: &EventLabel, jobs: &mut VecDeque<PipelineJob>) -> EventStatus {
        let files = self.ctx.store().file_count(event);
        if files > self.ctx.config.artifact_cap {
            info!("skipping '{event}': {files} files already present");
            self.ctx.journal.note(JournalEntry::EventSkipped {
                event: event.to_string(),
                files,
            });
            return EventStatus::Skipped { files };
        }
        match PromptSynthesizer::new(self.ctx).synthesize(event) {
            Ok(prompts) => {
                jobs.extend(prompts.into_iter().enumerate().map(|(prompt_index, prompt)| {
                    PipelineJob {
                        event: event.clone(),
                        prompt_index,
                        prompt,
                    }
                }));
                EventStatus::Settled
            }
            Err(err) => {
                error!("prompt synthesis failed for '{event}': {err}");
                self.ctx.journal.note(JournalEntry::PipelineFailed {
                    event: event.to_string(),
                    prompt_index: None,
                    kind: err.kind().as_str().to_string(),
                    error: err.message().to_string(),
                });
                EventStatus::PromptsFailed(err)
            }
        }
    }

    /// Bounded pool: at most `max_concurrency` workers drain the shared job
    /// queue; every artifact write goes through one writer thread.
    fn run_jobs(
        &self,
        jobs: VecDeque<PipelineJob>,
    ) -> Result<Vec<(PipelineJob, PipelineResult<PipelineOutcome>)>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.ctx.config.max_concurrency.clamp(1, jobs.len());
        let queue = Mutex::new(jobs);
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| -> Result<()> {
            let writer = ArtifactWriter::spawn_scoped(scope, self.ctx.store())?;
            for idx in 0..workers {
                let tx = tx.clone();
                let writer = writer.clone();
                let queue = &queue;
                thread::Builder::new()
                    .name(format!("pipeline-worker-{idx}"))
                    .spawn_scoped(scope, move || {
                        while let Some(job) = next_job(queue) {
                            let result = self.run_isolated(&writer, &job);
                            if tx.send((job, result)).is_err() {
                                break;
                            }
                        }
                    })
                    .context("pipeline worker spawn failed")?;
            }
            Ok(())
        })?;
        drop(tx);
        Ok(rx.into_iter().collect())
    }

    fn run_isolated(
        &self,
        sink: &dyn ArtifactSink,
        job: &PipelineJob,
    ) -> PipelineResult<PipelineOutcome> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| run_pipeline(self.ctx, sink, job)))
            .unwrap_or_else(|payload| Err(PipelineError::panicked(panic_message(payload.as_ref()))));
        match &result {
            Ok(PipelineOutcome::Exhausted {
                attempts,
                last_score,
            }) => self.ctx.journal.note(JournalEntry::PipelineExhausted {
                event: job.event.to_string(),
                prompt_index: job.prompt_index,
                attempts: *attempts,
                last_score: *last_score,
            }),
            Ok(PipelineOutcome::Accepted { .. }) => {}
            Err(err) => {
                error!(
                    "pipeline for '{}' prompt {} failed: {err}",
                    job.event, job.prompt_index
                );
                self.ctx.journal.note(JournalEntry::PipelineFailed {
                    event: job.event.to_string(),
                    prompt_index: Some(job.prompt_index),
                    kind: err.kind().as_str().to_string(),
                    error: err.message().to_string(),
                });
            }
        }
        result
    }
}

fn next_job(queue: &Mutex<VecDeque<PipelineJob>>) -> Option<PipelineJob> {
    match queue.lock() {
        Ok(mut jobs) => jobs.pop_front(),
        Err(poisoned) => {
            warn!("pipeline job queue lock poisoned; continuing");
            poisoned.into_inner().pop_front()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "pipeline panicked".to_string()
}
