//! Seek coordination against a live append pipeline.

use std::sync::Arc;

use msepipe_core::elements::NoDecryptors;
use msepipe_core::media::{MediaSample, MediaTime, StreamFormat, TrackIdRegistry};
use msepipe_core::pipeline::{
    AppendPipelineClient, AppendPipelineHandle, AppendState, InitializationSegment,
    PipelineContext,
};
use msepipe_core::playback::{
    PlaybackEvent, SeekCoordinator, SeekOutcome, SeekPhase, TransportLifecycle,
};
use msepipe_core::sim::{
    RecordingClient, RecordingEngine, SimContainer, SimDemuxer, SimulatedBuffers,
    SimulatedTransport,
};
use msepipe_core::{MseConfig, SeekError, TransportError, spawn_append_pipeline};
use tokio::sync::mpsc;

use crate::common::{Harness, WAIT, init_tracing};

/// Records everything and also reports each completed append on a channel,
/// the way a buffer manager tells the seek side its samples arrived.
struct CompletionRelay {
    recorder: Arc<RecordingClient>,
    completed: mpsc::UnboundedSender<()>,
}

impl AppendPipelineClient for CompletionRelay {
    fn initialization_segment_received(&self, segment: InitializationSegment) {
        self.recorder.initialization_segment_received(segment);
    }

    fn sample_received(&self, sample: MediaSample) {
        self.recorder.sample_received(sample);
    }

    fn all_pending_samples_received(&self) {
        self.recorder.all_pending_samples_received();
        let _ = self.completed.send(());
    }

    fn append_state_changed(&self, from: AppendState, to: AppendState) {
        self.recorder.append_state_changed(from, to);
    }
}

fn spawn_relayed() -> (
    AppendPipelineHandle,
    Arc<CompletionRelay>,
    mpsc::UnboundedReceiver<()>,
) {
    init_tracing();
    let (completed, completions) = mpsc::unbounded_channel();
    let relay = Arc::new(CompletionRelay {
        recorder: RecordingClient::new(),
        completed,
    });
    let context = PipelineContext::new(
        &relay,
        RecordingEngine::new(),
        Arc::new(NoDecryptors),
        Arc::new(TrackIdRegistry::new()),
    );
    let handle = spawn_append_pipeline(
        MseConfig::for_testing().pipeline,
        context,
        Box::new(SimDemuxer::new()),
    );
    (handle, relay, completions)
}

fn secs(seconds: i64) -> MediaTime {
    MediaTime::from_millis(seconds * 1000)
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_seek_into_unbuffered_range_waits_for_refill() {
    let transport = SimulatedTransport::new(TransportLifecycle::Ready);
    let buffers = SimulatedBuffers::new();
    buffers.insert(secs(0)..secs(2));

    let mut coordinator =
        SeekCoordinator::new(MseConfig::default().seek, transport.clone(), buffers.clone());
    let mut events = coordinator.subscribe();

    // Transport not prerolled yet.
    assert_eq!(
        coordinator.request_seek(secs(10)).await.unwrap(),
        SeekOutcome::Deferred
    );
    assert!(transport.seeks().is_empty());

    transport.set_lifecycle(TransportLifecycle::Paused);
    assert_eq!(
        coordinator.on_transport_state_changed().await.unwrap(),
        Some(SeekOutcome::WaitingForData)
    );
    assert_eq!(buffers.data_requests(), vec![secs(10)]);
    assert!(transport.seeks().is_empty());

    // The client appends the data around the target.
    let harness = Harness::spawn();
    let chunk = SimContainer::new()
        .stream(0, StreamFormat::video("video/x-h264", 640, 360))
        .sample(0, 10_000, 10_000, 40)
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;
    let appended = &harness.client.samples()[0];
    buffers.insert(appended.presentation_time()..secs(12));

    assert_eq!(
        coordinator.on_buffered_data_sufficient().await.unwrap(),
        Some(SeekOutcome::Issued { time: secs(10) })
    );
    assert_eq!(transport.seeks(), vec![secs(10)]);
    assert_eq!(buffers.seeked_to(), vec![secs(10)]);
    assert_eq!(coordinator.phase(), SeekPhase::InFlight);

    // Both sides have to confirm.
    coordinator.on_transport_seek_completed().await.unwrap();
    assert!(coordinator.is_seeking());
    coordinator.on_all_pending_samples_received().await.unwrap();
    assert!(!coordinator.is_seeking());
    assert_eq!(coordinator.position(), secs(10));

    assert_eq!(
        drain(&mut events),
        vec![
            PlaybackEvent::SeekStarted { target: secs(10) },
            PlaybackEvent::TimeChanged {
                position: secs(10)
            },
            PlaybackEvent::SeekCompleted {
                position: secs(10)
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_append_completion_settles_in_flight_seek() {
    let transport = SimulatedTransport::new(TransportLifecycle::Playing);
    let buffers = SimulatedBuffers::new();
    buffers.insert(secs(0)..secs(30));

    let mut coordinator =
        SeekCoordinator::new(MseConfig::default().seek, transport.clone(), buffers.clone());
    assert_eq!(
        coordinator.request_seek(secs(20)).await.unwrap(),
        SeekOutcome::Issued { time: secs(20) }
    );
    coordinator.on_transport_seek_completed().await.unwrap();
    assert!(coordinator.is_seeking());

    // The refill after the seek is what completes it.
    let (handle, relay, mut completions) = spawn_relayed();
    let chunk = SimContainer::new()
        .stream(0, StreamFormat::video("video/x-h264", 640, 360))
        .sample(0, 20_000, 20_000, 40)
        .sample(0, 20_040, 20_040, 40)
        .encode();
    handle.append(chunk).await.unwrap();

    let completion = tokio::time::timeout(WAIT, completions.recv()).await;
    assert_eq!(completion, Ok(Some(())));
    coordinator.on_all_pending_samples_received().await.unwrap();

    assert!(!coordinator.is_seeking());
    assert_eq!(coordinator.phase(), SeekPhase::Idle);
    assert_eq!(coordinator.position(), secs(20));
    assert_eq!(relay.recorder.samples().len(), 2);
    assert_eq!(transport.seeks(), vec![secs(20)]);
}

#[tokio::test]
async fn test_seek_snaps_to_nearby_buffered_start() {
    let transport = SimulatedTransport::new(TransportLifecycle::Playing);
    let buffers = SimulatedBuffers::new();
    buffers.insert(MediaTime::from_millis(5_050)..secs(8));

    let mut coordinator =
        SeekCoordinator::new(MseConfig::default().seek, transport.clone(), buffers.clone());

    assert_eq!(
        coordinator.request_seek(secs(5)).await.unwrap(),
        SeekOutcome::Issued {
            time: MediaTime::from_millis(5_050)
        }
    );
    assert!(buffers.data_requests().is_empty());
    assert_eq!(coordinator.target(), Some(MediaTime::from_millis(5_050)));
}

#[tokio::test]
async fn test_requests_during_flight_coalesce_to_latest() {
    let transport = SimulatedTransport::new(TransportLifecycle::Playing);
    let buffers = SimulatedBuffers::new();
    buffers.insert(secs(0)..secs(60));

    let mut coordinator =
        SeekCoordinator::new(MseConfig::default().seek, transport.clone(), buffers.clone());

    coordinator.request_seek(secs(10)).await.unwrap();
    assert_eq!(
        coordinator.request_seek(secs(20)).await.unwrap(),
        SeekOutcome::Coalesced
    );
    assert_eq!(
        coordinator.request_seek(secs(30)).await.unwrap(),
        SeekOutcome::Coalesced
    );
    assert_eq!(coordinator.pending_target(), Some(secs(30)));

    coordinator.on_all_pending_samples_received().await.unwrap();
    coordinator.on_transport_seek_completed().await.unwrap();

    // Only the newest request survives.
    assert_eq!(transport.seeks(), vec![secs(10), secs(30)]);
    assert_eq!(coordinator.pending_target(), None);
    assert!(coordinator.is_seeking());
}

#[tokio::test]
async fn test_failed_transport_seek_rolls_back() {
    let transport = SimulatedTransport::new(TransportLifecycle::Paused);
    let buffers = SimulatedBuffers::new();
    buffers.insert(secs(0)..secs(60));

    let mut coordinator =
        SeekCoordinator::new(MseConfig::default().seek, transport.clone(), buffers.clone());
    let mut events = coordinator.subscribe();

    transport.fail_next_seek("pipeline busy");
    let result = coordinator.request_seek(secs(4)).await;
    assert_eq!(
        result,
        Err(SeekError::Transport(TransportError::SeekRejected {
            reason: "pipeline busy".to_string()
        }))
    );
    assert!(!coordinator.is_seeking());
    assert_eq!(coordinator.target(), None);
    assert_eq!(coordinator.phase(), SeekPhase::Idle);

    let seen = drain(&mut events);
    assert!(matches!(seen.last(), Some(PlaybackEvent::SeekFailed { .. })));
}
