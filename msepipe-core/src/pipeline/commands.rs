//! Command definitions for the append pipeline actor.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::append_state::AppendState;
use super::errors::PipelineError;
use crate::elements::{GraphState, PushOutcome};
use crate::media::EncodedChunk;

/// Commands the handle sends to the append pipeline actor.
pub enum AppendPipelineCommand {
    /// Push one chunk for the current append.
    PushChunk {
        chunk: EncodedChunk,
        responder: oneshot::Sender<Result<PushOutcome, PipelineError>>,
    },
    /// Abort the current append once it has run to completion.
    Abort {
        responder: oneshot::Sender<Result<(), PipelineError>>,
    },
    /// No more bytes will be pushed for the current append.
    NotifyNoMoreInputData {
        responder: oneshot::Sender<Result<(), PipelineError>>,
    },
    /// Signal end of stream to the demuxer.
    EndOfStream {
        responder: oneshot::Sender<Result<(), PipelineError>>,
    },
    GetState {
        responder: oneshot::Sender<AppendState>,
    },
    GetStats {
        responder: oneshot::Sender<PipelineStats>,
    },
    /// Tear the pipeline down.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Snapshot of pipeline activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub state: AppendState,
    pub graph_state: GraphState,
    pub chunks_pushed: u64,
    pub samples_delivered: u64,
    pub appends_completed: u64,
    pub invalid_transitions: u64,
    pub first_buffer_departed: bool,
    pub discarded_streams: u64,
    pub discarded_samples: u64,
    pub has_track: bool,
    pub abort_pending: bool,
}
