use log::info;
use stickerloop_contracts::artifacts::StoredArtifact;
use stickerloop_contracts::journal::JournalEntry;
use stickerloop_contracts::queue::EventLabel;

use crate::describe::MetadataSynthesizer;
use crate::error::{PipelineError, PipelineErrorKind, PipelineResult};
use crate::gate::{GateOutcome, QualityGate};
use crate::media::image_extension;
use crate::services::EngineContext;
use crate::writer::{ArtifactSink, PersistRequest};

/// One prompt of one event, as scheduled by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineJob {
    pub event: EventLabel,
    pub prompt_index: usize,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Accepted {
        artifact: StoredArtifact,
        score: u8,
        attempt: u32,
    },
    Exhausted {
        attempts: u32,
        last_score: Option<u8>,
    },
}

impl PipelineOutcome {
    pub fn artifact(&self) -> Option<&StoredArtifact> {
        match self {
            Self::Accepted { artifact, .. } => Some(artifact),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Gate, describe, then persist. Exhaustion is a normal outcome and writes
/// nothing.
pub fn run_pipeline(
    ctx: &EngineContext,
    sink: &dyn ArtifactSink,
    job: &PipelineJob,
) -> PipelineResult<PipelineOutcome> {
    let accepted = match QualityGate::new(ctx).run(&job.event, &job.prompt)? {
        GateOutcome::Accepted(accepted) => accepted,
        GateOutcome::Exhausted {
            attempts,
            last_score,
        } => {
            info!(
                "'{}' prompt {} exhausted after {attempts} attempts",
                job.event, job.prompt_index
            );
            return Ok(PipelineOutcome::Exhausted {
                attempts,
                last_score,
            });
        }
    };

    let metadata = MetadataSynthesizer::new(ctx).describe(&job.event, &accepted.image)?;
    let image = ctx
        .fetcher
        .fetch(&accepted.uri)
        .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Fetch, &err))?;
    let extension = image_extension(&image, &ctx.config.default_image_extension);
    let artifact = sink.persist(PersistRequest {
        event: job.event.clone(),
        metadata,
        image,
        extension,
    })?;

    info!(
        "'{}' artifact '{}' saved to {}",
        job.event,
        artifact.metadata.title,
        artifact.image_path.display()
    );
    ctx.journal.note(JournalEntry::ArtifactCreated {
        event: job.event.to_string(),
        prompt_index: job.prompt_index,
        title: artifact.metadata.title.clone(),
        image_path: artifact.image_path.clone(),
        metadata_path: artifact.metadata_path.clone(),
        score: accepted.score,
        attempt: accepted.attempt,
    });
    Ok(PipelineOutcome::Accepted {
        artifact,
        score: accepted.score,
        attempt: accepted.attempt,
    })
}
