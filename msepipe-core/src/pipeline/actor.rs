//! Actor implementation for the append pipeline.

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::client::PipelineContext;
use super::commands::AppendPipelineCommand;
use super::core::AppendPipeline;
use super::handle::AppendPipelineHandle;
use crate::config::PipelineConfig;
use crate::elements::Demuxer;
use crate::elements::messages::{OwnerLink, ProcessingMessage};

/// Spawns an append pipeline actor and returns its handle.
///
/// The actor task is the pipeline's owning thread: every client callback and
/// every append state change runs inside it. The demuxer moves to a
/// dedicated processing thread on the first push.
///
/// Must be called from within a tokio runtime.
///
/// # Examples
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use msepipe_core::elements::Demuxer;
/// # use msepipe_core::pipeline::{AppendPipelineClient, MediaEngine};
/// # async fn example<C: AppendPipelineClient + 'static>(
/// #     client: Arc<C>,
/// #     engine: Arc<dyn MediaEngine>,
/// #     demuxer: Box<dyn Demuxer>,
/// # ) {
/// use msepipe_core::config::PipelineConfig;
/// use msepipe_core::elements::NoDecryptors;
/// use msepipe_core::media::{EncodedChunk, TrackIdRegistry};
/// use msepipe_core::pipeline::{PipelineContext, spawn_append_pipeline};
///
/// let context = PipelineContext::new(
///     &client,
///     engine,
///     Arc::new(NoDecryptors),
///     Arc::new(TrackIdRegistry::new()),
/// );
/// let handle = spawn_append_pipeline(PipelineConfig::default(), context, demuxer);
/// handle.append(EncodedChunk::from_static(b"...")).await.unwrap();
/// # }
/// ```
pub fn spawn_append_pipeline(
    config: PipelineConfig,
    context: PipelineContext,
    demuxer: Box<dyn Demuxer>,
) -> AppendPipelineHandle {
    let (sender, receiver) = mpsc::channel(config.command_channel_capacity.max(1));
    let (message_sender, message_receiver) = mpsc::unbounded_channel();

    let link = OwnerLink::new(message_sender, config.rendezvous_timeout, Handle::current());
    let pipeline = AppendPipeline::new(config, context, demuxer, link);
    let id = pipeline.id();

    tokio::spawn(async move {
        run_actor_loop(pipeline, receiver, message_receiver).await;
    });

    AppendPipelineHandle::new(id, sender)
}

/// Runs the actor loop until shutdown or invalidation.
///
/// Commands and processing-thread messages are handled one at a time, so
/// append state transitions are strictly ordered.
async fn run_actor_loop(
    mut pipeline: AppendPipeline,
    mut receiver: mpsc::Receiver<AppendPipelineCommand>,
    mut messages: mpsc::UnboundedReceiver<ProcessingMessage>,
) {
    tracing::debug!(pipeline = %pipeline.id(), "Append pipeline actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => {
                // Every handle dropped.
                let Some(command) = command else { break };
                if !handle_command(&mut pipeline, command) {
                    break;
                }
            }
            Some(message) = messages.recv() => {
                pipeline.handle_processing_message(message);
            }
        }

        if pipeline.is_invalid() {
            break;
        }
    }

    // Handles may still be alive; the actor is gone either way.
    pipeline.invalidate("actor stopped");
    drain_processing_messages(&pipeline, &mut messages);
    receiver.close();

    tracing::debug!(pipeline = %pipeline.id(), "Append pipeline actor stopped");
}

/// Wakes every processing-thread waiter still queued after invalidation.
fn drain_processing_messages(
    pipeline: &AppendPipeline,
    messages: &mut mpsc::UnboundedReceiver<ProcessingMessage>,
) {
    messages.close();
    while let Ok(message) = messages.try_recv() {
        pipeline.reject_processing_message(message);
    }
}

/// Handles a single command. Returns true to continue processing, false to
/// shut down.
fn handle_command(pipeline: &mut AppendPipeline, command: AppendPipelineCommand) -> bool {
    match command {
        AppendPipelineCommand::PushChunk { chunk, responder } => {
            let result = pipeline.push_chunk(chunk);
            let _ = responder.send(result);
        }

        AppendPipelineCommand::Abort { responder } => {
            let result = pipeline.abort();
            let _ = responder.send(result);
        }

        AppendPipelineCommand::NotifyNoMoreInputData { responder } => {
            let result = pipeline.notify_no_more_input_data();
            let _ = responder.send(result);
        }

        AppendPipelineCommand::EndOfStream { responder } => {
            let result = pipeline.end_of_stream();
            let _ = responder.send(result);
        }

        AppendPipelineCommand::GetState { responder } => {
            let _ = responder.send(pipeline.append_state());
        }

        AppendPipelineCommand::GetStats { responder } => {
            let _ = responder.send(pipeline.stats());
        }

        AppendPipelineCommand::Shutdown { responder } => {
            tracing::debug!(pipeline = %pipeline.id(), "Append pipeline shutting down");
            pipeline.invalidate("shutdown requested");
            let _ = responder.send(());
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;
    use tokio_test::assert_ok;

    use super::*;
    use crate::elements::messages::WiringDecision;
    use crate::elements::{DemuxError, DemuxerOutput, FlowResult, NoDecryptors, StreamId};
    use crate::media::{DemuxedSample, EncodedChunk, MediaTime, StreamFormat, TrackIdRegistry};
    use crate::sim::{RecordingClient, RecordingEngine, SimDemuxer};

    fn context(client: &Arc<RecordingClient>) -> PipelineContext {
        PipelineContext::new(
            client,
            RecordingEngine::new(),
            Arc::new(NoDecryptors),
            Arc::new(TrackIdRegistry::new()),
        )
    }

    fn frame(pts_ms: i64) -> DemuxedSample {
        DemuxedSample::new(
            MediaTime::from_millis(pts_ms),
            MediaTime::from_millis(pts_ms),
            MediaTime::from_millis(40),
            Bytes::from_static(b"frame"),
        )
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let reached = tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "condition not reached in time");
    }

    /// Delivers one sample, then parks until released before delivering a
    /// second one.
    struct GatedDemuxer {
        go: std_mpsc::Receiver<()>,
        results: Arc<Mutex<Vec<FlowResult>>>,
        dropped: Arc<AtomicBool>,
    }

    impl Demuxer for GatedDemuxer {
        fn push(
            &mut self,
            _chunk: &EncodedChunk,
            output: &mut dyn DemuxerOutput,
        ) -> Result<(), DemuxError> {
            output.stream_added(
                StreamId(0),
                Some(StreamFormat::video("video/x-h264", 320, 240)),
            );
            let first = output.sample(StreamId(0), frame(0));
            self.results.lock().push(first);

            let _ = self.go.recv();
            let second = output.sample(StreamId(0), frame(40));
            self.results.lock().push(second);
            Ok(())
        }

        fn flush(&mut self) {}
    }

    impl Drop for GatedDemuxer {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[tokio::test]
    async fn test_drain_answers_queued_rendezvous() {
        let client = RecordingClient::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx.clone(), None, Handle::current());
        let mut pipeline = AppendPipeline::new(
            PipelineConfig::default(),
            context(&client),
            Box::new(SimDemuxer::new()),
            link,
        );

        let (wiring_reply, wiring) = oneshot::channel();
        let queued = tx.send(ProcessingMessage::StreamWiring {
            stream: StreamId(0),
            format: None,
            reply: wiring_reply,
        });
        assert!(queued.is_ok());
        let (sample_reply, delivery) = oneshot::channel();
        let queued = tx.send(ProcessingMessage::SampleReady {
            stream: StreamId(0),
            sample: frame(0),
            reply: sample_reply,
        });
        assert!(queued.is_ok());

        pipeline.invalidate("test over");
        drain_processing_messages(&pipeline, &mut rx);

        assert!(matches!(wiring.await, Ok(WiringDecision::Rejected)));
        assert_eq!(delivery.await, Ok(FlowResult::Error));
        assert!(tx.send(ProcessingMessage::NeedData).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_wakes_parked_sample_delivery() {
        let client = RecordingClient::new();
        let (go, gate) = std_mpsc::channel();
        let results = Arc::new(Mutex::new(Vec::new()));
        let dropped = Arc::new(AtomicBool::new(false));
        let demuxer = GatedDemuxer {
            go: gate,
            results: Arc::clone(&results),
            dropped: Arc::clone(&dropped),
        };

        let config = PipelineConfig::default();
        assert_eq!(config.rendezvous_timeout, None);
        let handle = spawn_append_pipeline(config, context(&client), Box::new(demuxer));

        assert_ok!(handle.push_chunk(EncodedChunk::from_static(b"gated")).await);
        wait_until(|| results.lock().len() == 1).await;

        assert_ok!(handle.shutdown().await);
        assert_ok!(go.send(()));

        // The second delivery is answered with an error and the processing
        // thread winds down instead of blocking forever.
        wait_until(|| dropped.load(Ordering::Acquire)).await;
        assert_eq!(*results.lock(), vec![FlowResult::Ok, FlowResult::Error]);
        assert_eq!(client.samples().len(), 1);
        wait_until(|| !handle.is_running()).await;
    }
}
