//! Recording client and media engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::media::{MediaSample, MediaTime, TrackDescriptor, TrackId};
use crate::pipeline::{
    AppendPipelineClient, AppendState, InitializationSegment, MediaEngine, PipelineDiagnostic,
    PipelineId,
};

/// Every callback a [`RecordingClient`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    InitializationSegment(InitializationSegment),
    Sample(MediaSample),
    AllSamplesReceived,
    TrackFormatChanged(TrackDescriptor),
    EndOfStream(TrackId),
    StateChanged { from: AppendState, to: AppendState },
    Diagnostic(PipelineDiagnostic),
}

/// Client that records callbacks and lets tests wait for them.
#[derive(Debug, Default)]
pub struct RecordingClient {
    events: Mutex<Vec<ClientEvent>>,
    changed: Notify,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn samples(&self) -> Vec<MediaSample> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Sample(sample) => Some(sample.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn init_segments(&self) -> Vec<InitializationSegment> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::InitializationSegment(segment) => Some(segment.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<PipelineDiagnostic> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Diagnostic(diagnostic) => Some(diagnostic.clone()),
                _ => None,
            })
            .collect()
    }

    /// Target states of every accepted transition, in order.
    pub fn states(&self) -> Vec<AppendState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn all_samples_received_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, ClientEvent::AllSamplesReceived))
            .count()
    }

    /// Waits until `predicate` holds for the recorded events.
    ///
    /// Returns false if `limit` elapses first.
    pub async fn wait_for(
        &self,
        limit: Duration,
        predicate: impl Fn(&[ClientEvent]) -> bool,
    ) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.changed.notified();
                if predicate(&self.events.lock()) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Waits until "all pending samples received" fired `count` times.
    pub async fn wait_for_appends(&self, count: usize, limit: Duration) -> bool {
        self.wait_for(limit, |events| {
            events
                .iter()
                .filter(|e| matches!(e, ClientEvent::AllSamplesReceived))
                .count()
                >= count
        })
        .await
    }

    fn record(&self, event: ClientEvent) {
        self.events.lock().push(event);
        self.changed.notify_waiters();
    }
}

impl AppendPipelineClient for RecordingClient {
    fn initialization_segment_received(&self, segment: InitializationSegment) {
        self.record(ClientEvent::InitializationSegment(segment));
    }

    fn sample_received(&self, sample: MediaSample) {
        self.record(ClientEvent::Sample(sample));
    }

    fn all_pending_samples_received(&self) {
        self.record(ClientEvent::AllSamplesReceived);
    }

    fn track_format_changed(&self, track: &TrackDescriptor) {
        self.record(ClientEvent::TrackFormatChanged(track.clone()));
    }

    fn end_of_stream_received(&self, track_id: &TrackId) {
        self.record(ClientEvent::EndOfStream(track_id.clone()));
    }

    fn append_state_changed(&self, from: AppendState, to: AppendState) {
        self.record(ClientEvent::StateChanged { from, to });
    }

    fn diagnostic(&self, diagnostic: &PipelineDiagnostic) {
        self.record(ClientEvent::Diagnostic(diagnostic.clone()));
    }
}

/// One `track_detected` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTrack {
    pub pipeline: PipelineId,
    pub track: TrackDescriptor,
    pub is_first_track: bool,
}

/// Media engine with a fixed duration that records detected tracks.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    duration: Mutex<Option<MediaTime>>,
    detected: Mutex<Vec<DetectedTrack>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_duration(duration: MediaTime) -> Arc<Self> {
        let engine = Self::default();
        *engine.duration.lock() = Some(duration);
        Arc::new(engine)
    }

    pub fn detected(&self) -> Vec<DetectedTrack> {
        self.detected.lock().clone()
    }
}

impl MediaEngine for RecordingEngine {
    fn duration(&self) -> Option<MediaTime> {
        *self.duration.lock()
    }

    fn track_detected(&self, pipeline: PipelineId, track: &TrackDescriptor, is_first_track: bool) {
        self.detected.lock().push(DetectedTrack {
            pipeline,
            track: track.clone(),
            is_first_track,
        });
    }
}
