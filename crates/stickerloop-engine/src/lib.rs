//! Sticker generation engine: prompt synthesis, the quality gate, metadata,
//! and the batch orchestrator that drives them over an event queue.

pub mod config;
pub mod describe;
pub mod driver;
pub mod dryrun;
pub mod error;
pub mod gate;
pub mod intake;
pub mod media;
pub mod openai;
pub mod orchestrator;
pub mod pipeline;
pub mod services;
pub mod synth;
pub mod writer;

#[cfg(test)]
mod testing;

use chrono::Utc;
use uuid::Uuid;

pub use config::EngineConfig;
pub use driver::Driver;
pub use error::{PipelineError, PipelineErrorKind, PipelineResult};
pub use orchestrator::{BatchReport, Disposition, EventReport, Orchestrator};
pub use services::EngineContext;
pub use synth::PromptSynthesizer;

/// `run-<utc timestamp>-<8 hex>`; sortable by start time.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}
