use std::sync::mpsc;
use std::thread::{self, Scope};

use anyhow::Context;
use log::debug;
use stickerloop_contracts::artifacts::{ArtifactMetadata, ArtifactStore, StoredArtifact};
use stickerloop_contracts::queue::EventLabel;

use crate::error::{PipelineError, PipelineErrorKind, PipelineResult};

#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub event: EventLabel,
    pub metadata: ArtifactMetadata,
    pub image: Vec<u8>,
    pub extension: String,
}

/// Destination for accepted artifacts.
pub trait ArtifactSink {
    fn persist(&self, request: PersistRequest) -> PipelineResult<StoredArtifact>;
}

impl ArtifactSink for ArtifactStore {
    fn persist(&self, request: PersistRequest) -> PipelineResult<StoredArtifact> {
        ArtifactStore::persist(
            self,
            &request.event,
            &request.metadata,
            &request.image,
            &request.extension,
        )
        .map_err(|err| PipelineError::from_anyhow(PipelineErrorKind::Storage, &err))
    }
}

enum WriterCommand {
    Persist(PersistRequest, mpsc::Sender<PipelineResult<StoredArtifact>>),
}

/// Handle to the thread that owns every artifact write of a batch.
///
/// Pipelines hand over their bytes and block on the reply, so directory
/// creation and file writes happen on one thread only. The owner exits once
/// every handle is dropped.
#[derive(Clone)]
pub struct ArtifactWriter {
    sender: mpsc::Sender<WriterCommand>,
}

impl ArtifactWriter {
    pub fn spawn_scoped<'scope, 'env>(
        scope: &'scope Scope<'scope, 'env>,
        store: ArtifactStore,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel::<WriterCommand>();
        thread::Builder::new()
            .name("artifact-writer".to_string())
            .spawn_scoped(scope, move || run_writer(store, receiver))
            .context("artifact writer thread spawn failed")?;
        Ok(Self { sender })
    }
}

impl ArtifactSink for ArtifactWriter {
    fn persist(&self, request: PersistRequest) -> PipelineResult<StoredArtifact> {
        let (reply, response) = mpsc::channel();
        self.sender
            .send(WriterCommand::Persist(request, reply))
            .map_err(|_| PipelineError::storage("artifact writer is not running"))?;
        response
            .recv()
            .map_err(|_| PipelineError::storage("artifact writer dropped the request"))?
    }
}

fn run_writer(store: ArtifactStore, receiver: mpsc::Receiver<WriterCommand>) {
    for command in receiver {
        match command {
            WriterCommand::Persist(request, reply) => {
                let result = ArtifactSink::persist(&store, request);
                if let Ok(stored) = &result {
                    debug!("wrote {}", stored.image_path.display());
                }
                let _ = reply.send(result);
            }
        }
    }
}
