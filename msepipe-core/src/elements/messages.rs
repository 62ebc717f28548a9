//! Messages the processing thread sends to the owning thread.

use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::{ContextRequest, Decryptor, FlowResult, StreamId};
use crate::media::{DemuxedSample, StreamFormat};

/// Closed set of cross-thread notifications.
///
/// Variants carrying a `reply` are rendezvous: the processing thread blocks
/// until the owning thread answers or drops the sender.
pub(crate) enum ProcessingMessage {
    NeedData,
    BufferDeparted {
        len: usize,
    },
    StreamWiring {
        stream: StreamId,
        format: Option<StreamFormat>,
        reply: oneshot::Sender<WiringDecision>,
    },
    StreamRemoved {
        stream: StreamId,
    },
    FormatChanged {
        stream: StreamId,
        format: StreamFormat,
        first: bool,
    },
    SampleReady {
        stream: StreamId,
        sample: DemuxedSample,
        reply: oneshot::Sender<FlowResult>,
    },
    EndOfStream {
        stream: StreamId,
    },
    NeedContext {
        request: ContextRequest,
    },
    DemuxFailed {
        reason: String,
    },
    RendezvousTimedOut {
        operation: &'static str,
        limit: Duration,
    },
}

impl ProcessingMessage {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ProcessingMessage::NeedData => "need-data",
            ProcessingMessage::BufferDeparted { .. } => "buffer-departed",
            ProcessingMessage::StreamWiring { .. } => "stream-wiring",
            ProcessingMessage::StreamRemoved { .. } => "stream-removed",
            ProcessingMessage::FormatChanged { .. } => "format-changed",
            ProcessingMessage::SampleReady { .. } => "sample-ready",
            ProcessingMessage::EndOfStream { .. } => "end-of-stream",
            ProcessingMessage::NeedContext { .. } => "need-context",
            ProcessingMessage::DemuxFailed { .. } => "demux-failed",
            ProcessingMessage::RendezvousTimedOut { .. } => "rendezvous-timed-out",
        }
    }
}

/// Owning thread's answer to a stream wiring request.
pub(crate) enum WiringDecision {
    /// Link the stream to the sink, through `decryptor` when present.
    Linked { decryptor: Option<Box<dyn Decryptor>> },
    /// Leave the stream unlinked.
    Rejected,
}

/// Errors from a blocking round-trip to the owning thread.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RendezvousError {
    #[error("Owning side went away before replying")]
    Closed,

    #[error("No reply within {limit:?}")]
    TimedOut { limit: Duration },
}

/// Processing thread's only handle on the owning side.
#[derive(Clone)]
pub(crate) struct OwnerLink {
    messages: mpsc::UnboundedSender<ProcessingMessage>,
    timeout: Option<Duration>,
    runtime: Handle,
}

impl OwnerLink {
    pub(crate) fn new(
        messages: mpsc::UnboundedSender<ProcessingMessage>,
        timeout: Option<Duration>,
        runtime: Handle,
    ) -> Self {
        Self {
            messages,
            timeout,
            runtime,
        }
    }

    /// Posts a notification without waiting. Returns false once the owning
    /// side has gone away.
    pub(crate) fn post(&self, message: ProcessingMessage) -> bool {
        self.messages.send(message).is_ok()
    }

    /// Sends a message carrying a reply slot and blocks for the answer.
    ///
    /// Must only be called from a thread outside the async runtime.
    ///
    /// # Errors
    ///
    /// - `RendezvousError::Closed` - Owning side dropped the reply slot
    /// - `RendezvousError::TimedOut` - Configured limit elapsed first
    pub(crate) fn rendezvous<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ProcessingMessage,
    ) -> Result<T, RendezvousError> {
        let (reply, answer) = oneshot::channel();
        self.messages
            .send(build(reply))
            .map_err(|_| RendezvousError::Closed)?;

        match self.timeout {
            None => answer.blocking_recv().map_err(|_| RendezvousError::Closed),
            Some(limit) => {
                let waited = self
                    .runtime
                    .block_on(async move { tokio::time::timeout(limit, answer).await });
                match waited {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(_)) => Err(RendezvousError::Closed),
                    Err(_) => Err(RendezvousError::TimedOut { limit }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[tokio::test]
    async fn test_rendezvous_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, None, Handle::current());

        let worker = thread::spawn(move || {
            link.rendezvous(|reply| ProcessingMessage::SampleReady {
                stream: StreamId(0),
                sample: DemuxedSample::new(
                    crate::media::MediaTime::ZERO,
                    crate::media::MediaTime::ZERO,
                    crate::media::MediaTime::ZERO,
                    bytes::Bytes::new(),
                ),
                reply,
            })
        });

        match rx.recv().await {
            Some(ProcessingMessage::SampleReady { reply, .. }) => {
                reply.send(FlowResult::Ok).unwrap();
            }
            _ => panic!("expected sample-ready"),
        }

        assert_eq!(worker.join().unwrap(), Ok(FlowResult::Ok));
    }

    #[tokio::test]
    async fn test_rendezvous_dropped_reply_reports_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, None, Handle::current());

        let worker = thread::spawn(move || {
            link.rendezvous(|reply| ProcessingMessage::StreamWiring {
                stream: StreamId(1),
                format: None,
                reply,
            })
            .map(|_| ())
        });

        let message = rx.recv().await.unwrap();
        assert_eq!(message.name(), "stream-wiring");
        drop(message);

        assert_eq!(worker.join().unwrap(), Err(RendezvousError::Closed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rendezvous_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, Some(Duration::from_millis(20)), Handle::current());

        let worker = thread::spawn(move || {
            link.rendezvous(|reply| ProcessingMessage::StreamWiring {
                stream: StreamId(1),
                format: None,
                reply,
            })
            .map(|_| ())
        });

        // Hold the message without answering until the worker gives up.
        let held = rx.recv().await.unwrap();
        let result = tokio::task::spawn_blocking(move || worker.join().unwrap())
            .await
            .unwrap();
        drop(held);

        assert_eq!(
            result,
            Err(RendezvousError::TimedOut {
                limit: Duration::from_millis(20)
            })
        );
    }

    #[test]
    fn test_post_fails_after_owner_drops() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, None, runtime.handle().clone());
        drop(rx);
        assert!(!link.post(ProcessingMessage::NeedData));
    }
}
