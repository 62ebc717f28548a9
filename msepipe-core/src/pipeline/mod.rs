//! Append pipeline: the per-source-buffer actor that runs the append state
//! machine and bridges client callbacks with the processing thread.

pub mod actor;
pub mod append_state;
pub mod client;
pub mod commands;
pub mod core;
pub mod errors;
pub mod handle;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use actor::spawn_append_pipeline;
pub use append_state::AppendState;
pub use client::{
    AppendPipelineClient, InitializationSegment, MediaEngine, PipelineContext, PipelineDiagnostic,
};
pub use commands::PipelineStats;
pub use errors::PipelineError;
pub use handle::AppendPipelineHandle;

/// Identity of one append pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId(Uuid);

impl PipelineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used to name the processing thread.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
