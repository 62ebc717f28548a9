//! Element graph lifecycle and the processing thread that drives it.

use std::fmt;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::messages::{OwnerLink, ProcessingMessage};
use super::router::{ProcessingCounters, StreamRouter};
use super::source::{AppSource, DepartureProbe, PushOutcome, SourceItem};
use super::{DemuxError, Demuxer};
use crate::media::EncodedChunk;
use crate::pipeline::{PipelineError, PipelineId};

/// Activity state of the element graph as seen from the owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    /// Flushed and waiting for the next append.
    Idle,
    /// Processing thread running and streams flowing.
    Active,
    /// Torn down; no further data is accepted.
    Stopped,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphState::Idle => write!(f, "idle"),
            GraphState::Active => write!(f, "active"),
            GraphState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owning-thread half of the source → demuxer → (decryptor →) sink chain.
///
/// The demuxer moves onto a dedicated processing thread the first time the
/// graph starts and stays there until shutdown.
pub(crate) struct ElementGraph {
    pipeline: PipelineId,
    state: GraphState,
    source: AppSource,
    demuxer: Option<Box<dyn Demuxer>>,
    link: OwnerLink,
    probe: Arc<DepartureProbe>,
    counters: Arc<ProcessingCounters>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ElementGraph {
    pub(crate) fn new(
        pipeline: PipelineId,
        demuxer: Box<dyn Demuxer>,
        link: OwnerLink,
        probe: Arc<DepartureProbe>,
    ) -> Self {
        Self {
            pipeline,
            state: GraphState::Idle,
            source: AppSource::new(),
            demuxer: Some(demuxer),
            link,
            probe,
            counters: Arc::new(ProcessingCounters::default()),
            worker: None,
        }
    }

    pub(crate) fn state(&self) -> GraphState {
        self.state
    }

    pub(crate) fn counters(&self) -> &ProcessingCounters {
        &self.counters
    }

    /// Whether the processing thread has been spawned.
    pub(crate) fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Brings the graph to the active state, spawning the processing thread
    /// on first use.
    ///
    /// # Errors
    ///
    /// - `PipelineError::ElementsStopped` - Graph was already shut down
    /// - `PipelineError::ProcessingSpawnFailed` - OS refused to create the thread
    pub(crate) fn start(&mut self) -> Result<(), PipelineError> {
        if self.state == GraphState::Stopped {
            return Err(PipelineError::ElementsStopped);
        }

        if let Some(demuxer) = self.demuxer.take() {
            let (items_tx, items_rx) = mpsc::unbounded_channel();
            let link = self.link.clone();
            let probe = Arc::clone(&self.probe);
            let counters = Arc::clone(&self.counters);

            let worker = thread::Builder::new()
                .name(format!("msepipe-demux-{}", self.pipeline.short()))
                .spawn(move || run_processing_loop(demuxer, items_rx, link, probe, counters))
                .map_err(|e| PipelineError::ProcessingSpawnFailed {
                    reason: e.to_string(),
                })?;

            self.source.attach(items_tx);
            self.worker = Some(worker);
            tracing::debug!(pipeline = %self.pipeline, "Processing thread started");
        }

        self.state = GraphState::Active;
        Ok(())
    }

    /// Keeps the graph active while a stream is being linked.
    pub(crate) fn ensure_active(&mut self) {
        if self.state == GraphState::Idle {
            tracing::debug!(pipeline = %self.pipeline, "Graph reactivated for stream wiring");
            self.state = GraphState::Active;
        }
    }

    /// # Errors
    ///
    /// - `PipelineError::SourceQueueFull` - A chunk is already waiting for need-data
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn push(&mut self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        self.source.push(chunk)
    }

    /// # Errors
    ///
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn on_need_data(&mut self) -> Result<bool, PipelineError> {
        self.source.on_need_data()
    }

    /// Flushes every element back to idle and re-arms the departure probe.
    pub(crate) fn reset(&mut self) {
        if self.state == GraphState::Stopped {
            return;
        }

        self.source.flush();
        self.probe.rearm();
        self.state = GraphState::Idle;
        tracing::debug!(pipeline = %self.pipeline, "Element graph reset");
    }

    /// # Errors
    ///
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn end_of_stream(&mut self) -> Result<(), PipelineError> {
        self.source.end_of_stream()
    }

    /// Disconnects the source so the processing thread exits after its
    /// current item. The thread is detached, not joined.
    pub(crate) fn shutdown(&mut self) {
        if self.state == GraphState::Stopped {
            return;
        }

        self.source.detach();
        self.state = GraphState::Stopped;
        if self.worker.take().is_some() {
            tracing::debug!(pipeline = %self.pipeline, "Processing thread detached");
        }
    }
}

/// Body of the processing thread.
///
/// Pulls work from the source until it is detached or the owning side goes
/// away, reporting need-data after every chunk.
fn run_processing_loop(
    mut demuxer: Box<dyn Demuxer>,
    mut items: mpsc::UnboundedReceiver<SourceItem>,
    link: OwnerLink,
    probe: Arc<DepartureProbe>,
    counters: Arc<ProcessingCounters>,
) {
    let mut router = StreamRouter::new(link.clone(), counters);

    while let Some(item) = items.blocking_recv() {
        match item {
            SourceItem::Chunk(chunk) => {
                if probe.observe() {
                    link.post(ProcessingMessage::BufferDeparted { len: chunk.len() });
                }

                match demuxer.push(&chunk, &mut router) {
                    Ok(()) => {}
                    Err(DemuxError::Malformed { reason }) => {
                        tracing::warn!("Demuxer rejected chunk: {reason}");
                        link.post(ProcessingMessage::DemuxFailed { reason });
                    }
                    Err(DemuxError::Flow { result }) => {
                        tracing::debug!(?result, "Demuxer stopped on downstream flow result");
                    }
                }

                if !link.post(ProcessingMessage::NeedData) {
                    break;
                }
            }
            SourceItem::Flush => {
                demuxer.flush();
                router.reset();
            }
            SourceItem::EndOfStream => {
                demuxer.end_of_stream(&mut router);
                router.end_of_stream();
            }
        }
    }

    tracing::debug!("Processing loop exited");
}

#[cfg(test)]
mod tests {
    use tokio::runtime::Handle;

    use super::*;
    use crate::elements::DemuxerOutput;

    /// Demuxer that fails on chunks starting with `!`.
    struct PickyDemuxer;

    impl Demuxer for PickyDemuxer {
        fn push(
            &mut self,
            chunk: &EncodedChunk,
            _output: &mut dyn DemuxerOutput,
        ) -> Result<(), DemuxError> {
            if chunk.as_bytes().first() == Some(&b'!') {
                return Err(DemuxError::Malformed {
                    reason: "bang".to_string(),
                });
            }
            Ok(())
        }

        fn flush(&mut self) {}
    }

    fn graph() -> (ElementGraph, mpsc::UnboundedReceiver<ProcessingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, None, Handle::current());
        let graph = ElementGraph::new(
            PipelineId::new(),
            Box::new(PickyDemuxer),
            link,
            Arc::new(DepartureProbe::new(false)),
        );
        (graph, rx)
    }

    #[tokio::test]
    async fn test_chunk_produces_departure_then_need_data() {
        let (mut graph, mut rx) = graph();
        graph.start().unwrap();
        assert_eq!(graph.state(), GraphState::Active);

        graph.push(EncodedChunk::from_static(b"abc")).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "buffer-departed");
        assert_eq!(rx.recv().await.unwrap().name(), "need-data");

        graph.on_need_data().unwrap();
        graph.push(EncodedChunk::from_static(b"def")).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "need-data");
        graph.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_chunk_reports_failure() {
        let (mut graph, mut rx) = graph();
        graph.start().unwrap();

        graph.push(EncodedChunk::from_static(b"!")).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "buffer-departed");
        assert_eq!(rx.recv().await.unwrap().name(), "demux-failed");
        assert_eq!(rx.recv().await.unwrap().name(), "need-data");
        graph.shutdown();
    }

    #[tokio::test]
    async fn test_reset_rearms_probe_and_idles() {
        let (mut graph, mut rx) = graph();
        graph.start().unwrap();
        graph.push(EncodedChunk::from_static(b"a")).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "buffer-departed");
        assert_eq!(rx.recv().await.unwrap().name(), "need-data");

        graph.reset();
        assert_eq!(graph.state(), GraphState::Idle);

        graph.start().unwrap();
        graph.push(EncodedChunk::from_static(b"b")).unwrap();
        assert_eq!(rx.recv().await.unwrap().name(), "buffer-departed");
        graph.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_graph() {
        let (mut graph, _rx) = graph();
        graph.start().unwrap();
        graph.shutdown();

        assert_eq!(graph.state(), GraphState::Stopped);
        assert_eq!(graph.start(), Err(PipelineError::ElementsStopped));
        assert_eq!(
            graph.push(EncodedChunk::from_static(b"a")),
            Err(PipelineError::ElementsStopped)
        );
    }
}
