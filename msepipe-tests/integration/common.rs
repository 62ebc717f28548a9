//! Shared fixtures for the integration suite.

use std::sync::Arc;
use std::time::Duration;

use msepipe_core::MseConfig;
use msepipe_core::elements::{DecryptorFactory, NoDecryptors};
use msepipe_core::media::TrackIdRegistry;
use msepipe_core::pipeline::{AppendPipelineHandle, AppendState, PipelineContext};
use msepipe_core::sim::{ChunkLog, ClientEvent, RecordingClient, RecordingEngine, SimDemuxer};
use msepipe_core::spawn_append_pipeline;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

/// Routes pipeline logs through the test writer; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One spawned pipeline plus the fakes observing it.
pub struct Harness {
    pub handle: AppendPipelineHandle,
    pub client: Arc<RecordingClient>,
    pub engine: Arc<RecordingEngine>,
    pub chunks: ChunkLog,
    /// Number of times the demuxer was flushed.
    pub flushes: Arc<Mutex<u32>>,
}

impl Harness {
    pub fn spawn() -> Self {
        Self::spawn_with(Arc::new(NoDecryptors), Arc::new(TrackIdRegistry::new()))
    }

    pub fn spawn_with(
        decryptors: Arc<dyn DecryptorFactory>,
        track_ids: Arc<TrackIdRegistry>,
    ) -> Self {
        init_tracing();
        let client = RecordingClient::new();
        let engine = RecordingEngine::new();
        let demuxer = SimDemuxer::new();
        let chunks = demuxer.chunk_log();
        let flushes = demuxer.flush_count();

        let context = PipelineContext::new(&client, engine.clone(), decryptors, track_ids);
        let handle = spawn_append_pipeline(
            MseConfig::for_testing().pipeline,
            context,
            Box::new(demuxer),
        );
        tracing::debug!(pipeline = %handle.id(), "Spawned test pipeline");

        Self {
            handle,
            client,
            engine,
            chunks,
            flushes,
        }
    }

    /// Waits for `count` completed appends and fails the test on timeout.
    pub async fn wait_for_appends(&self, count: usize) {
        assert!(
            self.client.wait_for_appends(count, WAIT).await,
            "expected {count} completed appends, saw events: {:?}",
            self.client.events()
        );
    }

    /// Waits until the last recorded transition entered `state`.
    pub async fn wait_for_state(&self, state: AppendState) {
        let reached = self
            .client
            .wait_for(WAIT, |events| {
                events.iter().rev().find_map(|e| match e {
                    ClientEvent::StateChanged { to, .. } => Some(*to),
                    _ => None,
                }) == Some(state)
            })
            .await;
        assert!(reached, "pipeline never settled in {state}");
    }

    /// Waits until `from -> to` has been recorded `count` times.
    pub async fn wait_for_transition(&self, from: AppendState, to: AppendState, count: usize) {
        let reached = self
            .client
            .wait_for(WAIT, |events| {
                events
                    .iter()
                    .filter(|e| {
                        matches!(e, ClientEvent::StateChanged { from: f, to: t } if *f == from && *t == to)
                    })
                    .count()
                    >= count
            })
            .await;
        assert!(reached, "never saw {from} -> {to} {count} times");
    }
}

/// Transitions recorded by the client, in order.
pub fn transitions(client: &RecordingClient) -> Vec<(AppendState, AppendState)> {
    client
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect()
}

/// Target states with consecutive repeats collapsed.
pub fn collapsed_states(client: &RecordingClient) -> Vec<AppendState> {
    let mut states = client.states();
    states.dedup();
    states
}
