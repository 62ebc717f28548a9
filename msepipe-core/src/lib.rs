//! msepipe core: Media Source Extensions append pipeline.
//!
//! Accepts container byte chunks from a buffer-management client, demuxes
//! them on a processing thread, splices decryption where needed, and
//! delivers samples back to the client through a strict append state
//! machine. A separate seek coordinator reconciles transport seeks with
//! buffered data.

pub mod config;
pub mod elements;
pub mod media;
pub mod pipeline;
pub mod playback;
#[cfg(any(test, feature = "test-utils"))]
pub mod sim;
pub mod tracing_setup;

pub use config::{ConfigError, MseConfig, PipelineConfig, SeekConfig};
pub use elements::{DecryptError, DemuxError, RendezvousError};
pub use pipeline::{AppendPipelineHandle, AppendState, PipelineError, spawn_append_pipeline};
pub use playback::{SeekCoordinator, SeekError, TransportError};

/// Top-level error for msepipe operations.
#[derive(Debug, thiserror::Error)]
pub enum MseError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),

    #[error("Decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Seek error: {0}")]
    Seek(#[from] SeekError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MseError {
    /// Whether the caller can keep using the pipeline after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            MseError::Pipeline(
                PipelineError::Shutdown
                    | PipelineError::Invalidated
                    | PipelineError::ProcessingSpawnFailed { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, MseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err: MseError = PipelineError::SourceQueueFull.into();
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Pipeline error: Source already holds a chunk waiting for need-data"
        );

        let err: MseError = PipelineError::Invalidated.into();
        assert!(!err.is_recoverable());

        let err: MseError = SeekError::from(TransportError::SeekRejected {
            reason: "busy".to_string(),
        })
        .into();
        assert!(matches!(err, MseError::Seek(SeekError::Transport(_))));
    }
}
