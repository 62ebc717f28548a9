//! Append state machine implementation for the actor model.

use std::sync::Arc;

use super::append_state::AppendState;
use super::client::{AppendPipelineClient, InitializationSegment, PipelineContext, PipelineDiagnostic};
use super::commands::PipelineStats;
use super::errors::PipelineError;
use super::PipelineId;
use crate::config::PipelineConfig;
use crate::elements::graph::ElementGraph;
use crate::elements::messages::{OwnerLink, ProcessingMessage, WiringDecision};
use crate::elements::{ContextRequest, Demuxer, DepartureProbe, FlowResult, PushOutcome, StreamId};
use crate::media::{
    DemuxedSample, EncodedChunk, MediaSample, MediaTime, StreamFormat, StreamKind,
    TrackDescriptor, classify,
};

/// The single track an append pipeline may hold.
struct TrackState {
    stream: StreamId,
    kind: StreamKind,
    descriptor: TrackDescriptor,
    /// Set once the track has been reported to the engine and client.
    announced: bool,
    /// The next sample is the first one on this track.
    awaiting_first_sample: bool,
}

/// Core append pipeline implementation.
///
/// Runs inside the actor and is the only place append state changes. The
/// element graph it owns forwards chunks to the processing thread; everything
/// the processing thread reports comes back through
/// [`AppendPipeline::handle_processing_message`].
pub struct AppendPipeline {
    id: PipelineId,
    config: PipelineConfig,
    context: PipelineContext,
    state: AppendState,
    graph: ElementGraph,
    probe: Arc<DepartureProbe>,
    track: Option<TrackState>,
    /// Chunk pushed while an abort was pending.
    pending_chunk: Option<EncodedChunk>,
    abort_pending: bool,
    /// Latch armed by `notify_no_more_input_data`.
    no_more_input: bool,
    /// Latch for the held chunk's append, applied once it is released.
    pending_no_more_input: bool,
    /// Need-data arrived since the last chunk was pushed.
    need_data_received: bool,
    /// Whether this pipeline ever reported a detected track.
    detected_any_track: bool,
    chunks_pushed: u64,
    samples_delivered: u64,
    appends_completed: u64,
    invalid_transitions: u64,
}

impl AppendPipeline {
    pub(crate) fn new(
        config: PipelineConfig,
        context: PipelineContext,
        demuxer: Box<dyn Demuxer>,
        link: OwnerLink,
    ) -> Self {
        let id = PipelineId::new();
        let probe = Arc::new(DepartureProbe::new(config.diagnostics_logging));
        let graph = ElementGraph::new(id, demuxer, link, Arc::clone(&probe));

        Self {
            id,
            config,
            context,
            state: AppendState::NotStarted,
            graph,
            probe,
            track: None,
            pending_chunk: None,
            abort_pending: false,
            no_more_input: false,
            pending_no_more_input: false,
            need_data_received: false,
            detected_any_track: false,
            chunks_pushed: 0,
            samples_delivered: 0,
            appends_completed: 0,
            invalid_transitions: 0,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn append_state(&self) -> AppendState {
        self.state
    }

    pub fn is_invalid(&self) -> bool {
        self.state == AppendState::Invalid
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state,
            graph_state: self.graph.state(),
            chunks_pushed: self.chunks_pushed,
            samples_delivered: self.samples_delivered,
            appends_completed: self.appends_completed,
            invalid_transitions: self.invalid_transitions,
            first_buffer_departed: self.probe.has_departed(),
            discarded_streams: self.graph.counters().discarded_streams(),
            discarded_samples: self.graph.counters().discarded_samples(),
            has_track: self.track.is_some(),
            abort_pending: self.abort_pending,
        }
    }

    /// Pushes a chunk for the current append.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Invalidated` - Pipeline is in its terminal state
    /// - `PipelineError::SourceQueueFull` - A chunk is already waiting
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub fn push_chunk(&mut self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        if self.is_invalid() {
            return Err(PipelineError::Invalidated);
        }

        if self.abort_pending {
            if self.pending_chunk.is_some() {
                return Err(PipelineError::SourceQueueFull);
            }
            tracing::debug!(pipeline = %self.id, len = chunk.len(), "Abort pending, holding chunk");
            self.pending_chunk = Some(chunk);
            return Ok(PushOutcome::Deferred);
        }

        if self.state == AppendState::NotStarted {
            self.set_append_state(AppendState::Ongoing);
            if self.is_invalid() {
                return Err(PipelineError::Invalidated);
            }
        }

        self.forward_chunk(chunk)
    }

    /// Aborts the current append once it has run to completion.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Invalidated` - Pipeline is in its terminal state
    pub fn abort(&mut self) -> Result<(), PipelineError> {
        if self.is_invalid() {
            return Err(PipelineError::Invalidated);
        }

        if self.abort_pending {
            if self.pending_chunk.take().is_some() {
                tracing::debug!(pipeline = %self.id, "Abort re-issued, dropping held chunk");
            }
            self.pending_no_more_input = false;
            return Ok(());
        }

        self.abort_pending = true;
        if self.state == AppendState::NotStarted {
            self.set_append_state(AppendState::Aborting);
        } else {
            tracing::debug!(pipeline = %self.id, state = %self.state, "Abort deferred until append completes");
        }
        Ok(())
    }

    /// Announces that the current append has no more chunks.
    ///
    /// Once the aborted append already holds its own latch, the call belongs
    /// to the chunk held behind the abort and is replayed when it is released.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Invalidated` - Pipeline is in its terminal state
    pub fn notify_no_more_input_data(&mut self) -> Result<(), PipelineError> {
        if self.is_invalid() {
            return Err(PipelineError::Invalidated);
        }

        if self.pending_chunk.is_some() && self.no_more_input {
            tracing::debug!(pipeline = %self.id, "No more input for held chunk");
            self.pending_no_more_input = true;
            return Ok(());
        }

        self.no_more_input = true;
        self.check_end_of_append();
        Ok(())
    }

    /// # Errors
    ///
    /// - `PipelineError::Invalidated` - Pipeline is in its terminal state
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub fn end_of_stream(&mut self) -> Result<(), PipelineError> {
        if self.is_invalid() {
            return Err(PipelineError::Invalidated);
        }

        if !self.graph.is_started() {
            tracing::debug!(pipeline = %self.id, "End of stream before any append");
            return Ok(());
        }
        self.graph.end_of_stream()
    }

    /// Moves to the terminal state and stops the element graph.
    pub fn invalidate(&mut self, reason: &str) {
        if self.is_invalid() {
            return;
        }

        tracing::debug!(pipeline = %self.id, reason, "Invalidating append pipeline");
        self.set_append_state(AppendState::Invalid);
    }

    /// Dispatches one notification from the processing thread.
    pub(crate) fn handle_processing_message(&mut self, message: ProcessingMessage) {
        tracing::trace!(pipeline = %self.id, message = message.name(), "Processing message");

        match message {
            ProcessingMessage::NeedData => self.on_need_data(),
            ProcessingMessage::BufferDeparted { len } => {
                tracing::debug!(pipeline = %self.id, len, "Buffer departed the source");
            }
            ProcessingMessage::StreamWiring {
                stream,
                format,
                reply,
            } => {
                let decision = self.wire_stream(stream, format);
                if reply.send(decision).is_err() {
                    tracing::warn!(pipeline = %self.id, %stream, "Wiring requester went away");
                    if self.track.as_ref().is_some_and(|t| t.stream == stream) {
                        self.track = None;
                    }
                }
            }
            ProcessingMessage::StreamRemoved { stream } => {
                if self.track.as_ref().is_some_and(|t| t.stream == stream) {
                    tracing::debug!(pipeline = %self.id, %stream, "Track stream removed");
                    self.track = None;
                }
            }
            ProcessingMessage::FormatChanged {
                stream,
                format,
                first,
            } => self.on_format_changed(stream, format, first),
            ProcessingMessage::SampleReady {
                stream,
                sample,
                reply,
            } => {
                let result = self.on_sample(stream, sample);
                let _ = reply.send(result);
            }
            ProcessingMessage::EndOfStream { stream } => {
                let track_id = match &self.track {
                    Some(track) if track.stream == stream => track.descriptor.id.clone(),
                    _ => return,
                };
                self.with_client(|client| client.end_of_stream_received(&track_id));
            }
            ProcessingMessage::NeedContext { request } => self.on_need_context(request),
            ProcessingMessage::DemuxFailed { reason } => {
                self.report(PipelineDiagnostic::DemuxFailed { reason });
            }
            ProcessingMessage::RendezvousTimedOut { operation, limit } => {
                self.report(PipelineDiagnostic::RendezvousTimedOut {
                    operation: operation.to_string(),
                    limit,
                });
            }
        }
    }

    /// Answers a message that arrived after invalidation so its sender
    /// observes the terminal state.
    pub(crate) fn reject_processing_message(&self, message: ProcessingMessage) {
        match message {
            ProcessingMessage::StreamWiring { reply, .. } => {
                let _ = reply.send(WiringDecision::Rejected);
            }
            ProcessingMessage::SampleReady { reply, .. } => {
                let _ = reply.send(FlowResult::Error);
            }
            other => {
                tracing::trace!(pipeline = %self.id, message = other.name(), "Dropped after invalidation");
            }
        }
    }

    /// Applies a transition and the side effects attached to it, following
    /// automatic onward transitions until the machine settles.
    fn set_append_state(&mut self, requested: AppendState) {
        use AppendState::*;

        let mut next = requested;
        let mut release = None;

        loop {
            let from = self.state;
            if !from.can_transition_to(next) {
                self.report_invalid_transition(from, next);
                break;
            }

            self.state = next;
            tracing::debug!(pipeline = %self.id, %from, to = %next, "Append state changed");
            self.with_client(|client| client.append_state_changed(from, next));
            if self.is_invalid() && next != Invalid {
                // Client went away while being notified.
                return;
            }

            let onward = match next {
                Invalid => {
                    self.pending_chunk = None;
                    self.pending_no_more_input = false;
                    self.track = None;
                    self.graph.shutdown();
                    None
                }
                Ongoing if from == NotStarted => {
                    if let Err(e) = self.graph.start() {
                        tracing::error!(pipeline = %self.id, "Failed to start elements: {e}");
                        self.report(PipelineDiagnostic::ElementFailure {
                            reason: e.to_string(),
                        });
                    }
                    None
                }
                DataStarve | LastSample => {
                    self.appends_completed += 1;
                    self.with_client(|client| client.all_pending_samples_received());
                    if self.is_invalid() {
                        return;
                    }
                    Some(if self.abort_pending { Aborting } else { NotStarted })
                }
                Aborting => Some(NotStarted),
                NotStarted => {
                    if from == Aborting {
                        self.graph.reset();
                        self.track = None;
                        self.abort_pending = false;
                    }
                    self.no_more_input = false;
                    self.need_data_received = false;

                    if from != NotStarted && self.pending_chunk.is_some() {
                        Some(NotStarted)
                    } else if from == NotStarted {
                        release = self.pending_chunk.take();
                        release.as_ref().map(|_| Ongoing)
                    } else {
                        None
                    }
                }
                _ => None,
            };

            match onward {
                Some(state) => next = state,
                None => break,
            }
        }

        if let Some(chunk) = release {
            tracing::debug!(pipeline = %self.id, len = chunk.len(), "Releasing held chunk");
            if let Err(e) = self.forward_chunk(chunk) {
                tracing::error!(pipeline = %self.id, "Failed to push held chunk: {e}");
                self.report(PipelineDiagnostic::ElementFailure {
                    reason: e.to_string(),
                });
            }

            if std::mem::take(&mut self.pending_no_more_input) {
                self.no_more_input = true;
                self.check_end_of_append();
            }
        }
    }

    fn report_invalid_transition(&mut self, from: AppendState, to: AppendState) {
        tracing::warn!(pipeline = %self.id, %from, %to, "Rejected invalid append state transition");
        self.invalid_transitions += 1;
        self.report(PipelineDiagnostic::InvalidTransition { from, to });
    }

    fn forward_chunk(&mut self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        let len = chunk.len();
        let outcome = self.graph.push(chunk)?;
        self.need_data_received = false;
        self.chunks_pushed += 1;
        tracing::trace!(pipeline = %self.id, len, ?outcome, "Chunk pushed");
        Ok(outcome)
    }

    fn on_need_data(&mut self) {
        match self.graph.on_need_data() {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => tracing::debug!(pipeline = %self.id, "Need-data replay failed: {e}"),
        }

        self.need_data_received = true;
        self.check_end_of_append();
    }

    /// Ends the append once no more input is announced and the demuxer has
    /// drained everything pushed so far.
    fn check_end_of_append(&mut self) {
        let drained = self.no_more_input && self.need_data_received;
        if !drained || !self.state.accepts_end_of_append() {
            return;
        }

        let end = match self.state {
            AppendState::Sampling => AppendState::LastSample,
            _ => AppendState::DataStarve,
        };
        self.set_append_state(end);
    }

    fn wire_stream(&mut self, stream: StreamId, format: Option<StreamFormat>) -> WiringDecision {
        if self.is_invalid() {
            return WiringDecision::Rejected;
        }

        let Some(format) = format else {
            tracing::debug!(pipeline = %self.id, %stream, "Stream has no format yet, not wiring");
            return WiringDecision::Rejected;
        };

        if let Some(track) = &self.track {
            tracing::warn!(pipeline = %self.id, %stream, existing = %track.descriptor.id, "Track already present");
            return WiringDecision::Rejected;
        }

        let mut kind = classify(&format, &self.config.supported_media_types);
        let mut decryptor = None;

        if let Some(protection) = &format.protection {
            decryptor = self.context.decryptors.create_decryptor(&protection.system_id);
            if decryptor.is_none() {
                tracing::warn!(
                    pipeline = %self.id,
                    system_id = %protection.system_id,
                    "No decryptor for protection system"
                );
                let system_id = protection.system_id.clone();
                self.report(PipelineDiagnostic::MissingDecryptor { system_id });
                kind = StreamKind::Invalid;
            }
        }

        if kind == StreamKind::Invalid {
            if format.protection.is_none() || decryptor.is_some() {
                tracing::warn!(
                    pipeline = %self.id,
                    media_type = format.effective_media_type(),
                    "Unsupported stream"
                );
                self.report(PipelineDiagnostic::UnsupportedStream {
                    media_type: format.effective_media_type().to_string(),
                });
            }
            let segment = InitializationSegment {
                tracks: Vec::new(),
                duration: self.context.engine.duration(),
            };
            self.with_client(|client| client.initialization_segment_received(segment));
            return WiringDecision::Rejected;
        }

        let id = self.context.track_ids.allocate(kind);
        tracing::debug!(pipeline = %self.id, %stream, track = %id, %kind, "Linking stream");
        self.track = Some(TrackState {
            stream,
            kind,
            descriptor: TrackDescriptor::from_format(id, kind, &format),
            announced: false,
            awaiting_first_sample: true,
        });
        self.graph.ensure_active();

        WiringDecision::Linked { decryptor }
    }

    fn on_format_changed(&mut self, stream: StreamId, format: StreamFormat, first: bool) {
        let Some(track) = self.track.as_mut().filter(|t| t.stream == stream) else {
            tracing::debug!(pipeline = %self.id, %stream, "Format change for unknown stream");
            return;
        };

        if first || !track.announced {
            track.announced = true;
            let descriptor = track.descriptor.clone();
            let is_first_track = !self.detected_any_track;
            self.detected_any_track = true;

            self.context
                .engine
                .track_detected(self.id, &descriptor, is_first_track);
            let segment = InitializationSegment {
                tracks: vec![descriptor],
                duration: self.context.engine.duration(),
            };
            self.with_client(|client| client.initialization_segment_received(segment));
            return;
        }

        let updated = TrackDescriptor::from_format(track.descriptor.id.clone(), track.kind, &format);
        if updated == track.descriptor {
            return;
        }

        tracing::debug!(pipeline = %self.id, track = %updated.id, codec = %updated.codec, "Track format changed");
        track.descriptor = updated.clone();
        self.with_client(|client| client.track_format_changed(&updated));
    }

    fn on_sample(&mut self, stream: StreamId, sample: DemuxedSample) -> FlowResult {
        if self.is_invalid() {
            return FlowResult::Error;
        }

        if !self.track.as_ref().is_some_and(|t| t.stream == stream) {
            tracing::debug!(pipeline = %self.id, %stream, "Sample for stream without track");
            return FlowResult::NotLinked;
        }

        self.set_append_state(AppendState::Sampling);
        match self.state {
            AppendState::Sampling => {}
            AppendState::Invalid => return FlowResult::Error,
            // Out-of-order sample; already reported as an invalid transition.
            _ => return FlowResult::Ok,
        }

        let tolerance = MediaTime::from(self.config.leading_gap_tolerance);
        let Some(track) = self.track.as_mut() else {
            return FlowResult::NotLinked;
        };

        let mut media = MediaSample::bind(
            sample,
            track.descriptor.id.clone(),
            track.descriptor.presentation_size,
        );

        if track.awaiting_first_sample {
            track.awaiting_first_sample = false;
            let pts = media.presentation_time();
            if media.decode_time() == MediaTime::ZERO && pts > MediaTime::ZERO && pts <= tolerance {
                tracing::debug!(pipeline = %self.id, gap = %pts, "Extending first sample to zero");
                media.extend_to_the_beginning();
            }
        }

        tracing::trace!(
            pipeline = %self.id,
            track = %media.track_id(),
            pts = %media.presentation_time(),
            "Delivering sample"
        );
        self.samples_delivered += 1;
        self.with_client(|client| client.sample_received(media));

        if self.is_invalid() {
            FlowResult::Error
        } else {
            FlowResult::Ok
        }
    }

    fn on_need_context(&mut self, request: ContextRequest) {
        if self.state != AppendState::Ongoing {
            tracing::debug!(pipeline = %self.id, state = %self.state, "Context requested outside key negotiation window");
            self.context.decryptors.on_need_context(&request);
            return;
        }

        self.set_append_state(AppendState::KeyNegotiation);
        if self.state != AppendState::KeyNegotiation {
            return;
        }
        self.context.decryptors.on_need_context(&request);
        self.set_append_state(AppendState::Ongoing);
    }

    fn report(&mut self, diagnostic: PipelineDiagnostic) {
        if self.config.diagnostics_logging {
            tracing::info!(pipeline = %self.id, ?diagnostic, "Pipeline diagnostic");
        }
        self.with_client(|client| client.diagnostic(&diagnostic));
    }

    /// Runs `f` against the client, invalidating the pipeline if the client
    /// has been dropped. Returns whether the client was reached.
    fn with_client(&mut self, f: impl FnOnce(&dyn AppendPipelineClient)) -> bool {
        match self.context.client.upgrade() {
            Some(client) => {
                f(client.as_ref());
                true
            }
            None => {
                if !self.is_invalid() {
                    self.invalidate("client dropped");
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::runtime::Handle;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    use super::*;
    use crate::elements::NoDecryptors;
    use crate::media::TrackIdRegistry;
    use crate::sim::{RecordingClient, RecordingEngine, SimContainer, SimDemuxer};

    fn pipeline(
        client: &Arc<RecordingClient>,
    ) -> (AppendPipeline, mpsc::UnboundedReceiver<ProcessingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, Some(Duration::from_secs(5)), Handle::current());
        let context = PipelineContext::new(
            client,
            RecordingEngine::new(),
            Arc::new(NoDecryptors),
            Arc::new(TrackIdRegistry::new()),
        );
        let pipeline = AppendPipeline::new(
            PipelineConfig::default(),
            context,
            Box::new(SimDemuxer::new()),
            link,
        );
        (pipeline, rx)
    }

    /// Feeds processing messages to the pipeline until `done` holds.
    async fn pump(
        pipeline: &mut AppendPipeline,
        rx: &mut mpsc::UnboundedReceiver<ProcessingMessage>,
        done: impl Fn(&AppendPipeline) -> bool,
    ) {
        let pumped = tokio::time::timeout(Duration::from_secs(5), async {
            while !done(pipeline) {
                match rx.recv().await {
                    Some(message) => pipeline.handle_processing_message(message),
                    None => break,
                }
            }
        })
        .await;
        assert!(pumped.is_ok(), "pipeline did not settle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_while_idle_never_visits_ongoing() {
        let client = RecordingClient::new();
        let (mut pipeline, _rx) = pipeline(&client);

        assert_ok!(pipeline.abort());

        assert_eq!(pipeline.append_state(), AppendState::NotStarted);
        assert_eq!(
            client.states(),
            vec![AppendState::Aborting, AppendState::NotStarted]
        );
        assert!(!pipeline.stats().abort_pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_transition_is_reported_and_ignored() {
        let client = RecordingClient::new();
        let (mut pipeline, _rx) = pipeline(&client);

        pipeline.set_append_state(AppendState::LastSample);

        assert_eq!(pipeline.append_state(), AppendState::NotStarted);
        assert_eq!(pipeline.stats().invalid_transitions, 1);
        assert_eq!(
            client.diagnostics(),
            vec![PipelineDiagnostic::InvalidTransition {
                from: AppendState::NotStarted,
                to: AppendState::LastSample,
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_length_append_reaches_data_starve() {
        let client = RecordingClient::new();
        let (mut pipeline, mut rx) = pipeline(&client);

        pipeline.push_chunk(EncodedChunk::from_static(b"")).unwrap();
        pipeline.notify_no_more_input_data().unwrap();
        pump(&mut pipeline, &mut rx, |p| p.stats().appends_completed == 1).await;

        assert_eq!(pipeline.append_state(), AppendState::NotStarted);
        assert_eq!(
            client.states(),
            vec![
                AppendState::Ongoing,
                AppendState::DataStarve,
                AppendState::NotStarted
            ]
        );
        assert_eq!(client.all_samples_received_count(), 1);
        pipeline.invalidate("test over");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_leading_gap_is_extended_to_zero() {
        let client = RecordingClient::new();
        let (mut pipeline, mut rx) = pipeline(&client);

        let chunk = SimContainer::new()
            .stream(0, StreamFormat::video("video/x-h264", 320, 240))
            .sample(0, 33, 0, 33)
            .sample(0, 66, 33, 33)
            .encode();
        pipeline.push_chunk(chunk).unwrap();
        pipeline.notify_no_more_input_data().unwrap();
        pump(&mut pipeline, &mut rx, |p| p.stats().appends_completed == 1).await;

        let samples = client.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].presentation_time(), MediaTime::ZERO);
        assert_eq!(samples[0].duration(), MediaTime::from_millis(66));
        assert_eq!(samples[1].presentation_time(), MediaTime::from_millis(66));
        assert_eq!(samples[0].track_id().as_str(), "V1");
        pipeline.invalidate("test over");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_during_pending_abort_is_deferred() {
        let client = RecordingClient::new();
        let (mut pipeline, _rx) = pipeline(&client);

        pipeline.push_chunk(EncodedChunk::from_static(b"")).unwrap();
        pipeline.abort().unwrap();

        assert_eq!(
            pipeline.push_chunk(EncodedChunk::from_static(b"b")),
            Ok(PushOutcome::Deferred)
        );
        assert_eq!(
            pipeline.push_chunk(EncodedChunk::from_static(b"c")),
            Err(PipelineError::SourceQueueFull)
        );

        // Re-issuing the abort drops the held chunk.
        pipeline.abort().unwrap();
        assert!(pipeline.pending_chunk.is_none());
        pipeline.invalidate("test over");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_held_chunk_keeps_its_no_more_input_latch() {
        let client = RecordingClient::new();
        let (mut pipeline, mut rx) = pipeline(&client);

        assert_ok!(pipeline.push_chunk(EncodedChunk::from_static(b"")));
        assert_ok!(pipeline.notify_no_more_input_data());
        assert_ok!(pipeline.abort());
        assert_eq!(
            assert_ok!(pipeline.push_chunk(EncodedChunk::from_static(b""))),
            PushOutcome::Deferred
        );
        // Belongs to the held chunk; the aborted append is already latched.
        assert_ok!(pipeline.notify_no_more_input_data());

        pump(&mut pipeline, &mut rx, |p| p.stats().appends_completed == 2).await;

        assert_eq!(pipeline.append_state(), AppendState::NotStarted);
        assert_eq!(client.all_samples_received_count(), 2);
        assert_eq!(
            client.states(),
            vec![
                AppendState::Ongoing,
                AppendState::DataStarve,
                AppendState::Aborting,
                AppendState::NotStarted,
                AppendState::NotStarted,
                AppendState::Ongoing,
                AppendState::DataStarve,
                AppendState::NotStarted
            ]
        );
        pipeline.invalidate("test over");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_client_invalidates() {
        let client = RecordingClient::new();
        let (mut pipeline, _rx) = pipeline(&client);
        drop(client);

        pipeline.abort().unwrap();

        assert!(pipeline.is_invalid());
        assert_eq!(pipeline.abort(), Err(PipelineError::Invalidated));
        assert_eq!(
            pipeline.push_chunk(EncodedChunk::from_static(b"a")),
            Err(PipelineError::Invalidated)
        );
    }
}
