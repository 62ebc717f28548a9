//! Handle for communicating with the append pipeline actor.

use tokio::sync::{mpsc, oneshot};

use super::PipelineId;
use super::append_state::AppendState;
use super::commands::{AppendPipelineCommand, PipelineStats};
use super::errors::PipelineError;
use crate::elements::PushOutcome;
use crate::media::EncodedChunk;

/// Cloneable async front end of one append pipeline.
#[derive(Clone)]
pub struct AppendPipelineHandle {
    id: PipelineId,
    sender: mpsc::Sender<AppendPipelineCommand>,
}

impl AppendPipelineHandle {
    pub(crate) fn new(id: PipelineId, sender: mpsc::Sender<AppendPipelineCommand>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Pushes one chunk into the current append.
    ///
    /// Returns `Deferred` when an abort is pending; the chunk is pushed
    /// automatically once the abort completes.
    ///
    /// # Errors
    /// - `PipelineError::Invalidated` - Pipeline reached its terminal state
    /// - `PipelineError::SourceQueueFull` - A chunk is already waiting for need-data
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn push_chunk(&self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::PushChunk { chunk, responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)?
    }

    /// Pushes a chunk and announces that the append has no more input.
    ///
    /// # Errors
    /// - Any error from [`AppendPipelineHandle::push_chunk`]
    pub async fn append(&self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        let outcome = self.push_chunk(chunk).await?;
        self.notify_no_more_input_data().await?;
        Ok(outcome)
    }

    /// Aborts the current append. Idempotent while an abort is pending.
    ///
    /// # Errors
    /// - `PipelineError::Invalidated` - Pipeline reached its terminal state
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn abort(&self) -> Result<(), PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::Abort { responder }).await?;
        rx.await.map_err(|_| PipelineError::Shutdown)?
    }

    /// # Errors
    /// - `PipelineError::Invalidated` - Pipeline reached its terminal state
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn notify_no_more_input_data(&self) -> Result<(), PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::NotifyNoMoreInputData { responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)?
    }

    /// # Errors
    /// - `PipelineError::Invalidated` - Pipeline reached its terminal state
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn end_of_stream(&self) -> Result<(), PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::EndOfStream { responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)?
    }

    /// # Errors
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn append_state(&self) -> Result<AppendState, PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::GetState { responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)
    }

    /// # Errors
    /// - `PipelineError::Shutdown` - Actor is gone
    pub async fn stats(&self) -> Result<PipelineStats, PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::GetStats { responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)
    }

    /// Invalidates the pipeline and stops the actor.
    ///
    /// # Errors
    /// - `PipelineError::Shutdown` - Actor was already gone
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (responder, rx) = oneshot::channel();
        self.send(AppendPipelineCommand::Shutdown { responder })
            .await?;
        rx.await.map_err(|_| PipelineError::Shutdown)
    }

    /// Whether the actor is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, command: AppendPipelineCommand) -> Result<(), PipelineError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| PipelineError::Shutdown)
    }
}
