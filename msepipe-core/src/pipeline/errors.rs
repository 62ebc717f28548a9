//! Error types for the append pipeline.

use thiserror::Error;

/// Errors surfaced by append pipeline operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Append pipeline actor has shut down")]
    Shutdown,

    #[error("Append pipeline was invalidated")]
    Invalidated,

    #[error("Source already holds a chunk waiting for need-data")]
    SourceQueueFull,

    #[error("Processing elements are stopped")]
    ElementsStopped,

    #[error("Failed to spawn processing thread: {reason}")]
    ProcessingSpawnFailed { reason: String },
}
