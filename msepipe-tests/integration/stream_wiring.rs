//! Stream wiring: classification, the black hole, and decryptor splicing.

use std::sync::Arc;
use std::time::Duration;

use msepipe_core::media::{StreamFormat, TrackIdRegistry};
use msepipe_core::pipeline::{AppendState, PipelineDiagnostic, PipelineError};
use msepipe_core::sim::{SimContainer, StaticDecryptorFactory, XorDecryptor};

use crate::common::{Harness, collapsed_states};

const SYSTEM: &str = "9a04f079-9840-4286-ab92-e65be0885f95";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_additional_streams_are_discarded() {
    let harness = Harness::spawn();

    let chunk = SimContainer::new()
        .stream(0, StreamFormat::video("video/x-h264", 640, 360))
        .stream(1, StreamFormat::audio("audio/mpeg"))
        .sample(0, 0, 0, 40)
        .sample(1, 0, 0, 20)
        .sample(1, 20, 20, 20)
        .sample(0, 40, 40, 40)
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;

    let samples = harness.client.samples();
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.track_id().as_str() == "V1"));
    assert_eq!(harness.engine.detected().len(), 1);

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.discarded_streams, 1);
    assert_eq!(stats.discarded_samples, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsupported_codec_yields_empty_init_segment() {
    let harness = Harness::spawn();

    let chunk = SimContainer::new()
        .stream(0, StreamFormat::video("video/x-theora", 320, 240))
        .samples(0, 2, 40)
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;

    let segments = harness.client.init_segments();
    assert_eq!(segments.len(), 1);
    assert!(segments[0].tracks.is_empty());
    assert!(harness.engine.detected().is_empty());
    assert!(harness.client.samples().is_empty());
    assert!(harness.client.diagnostics().contains(
        &PipelineDiagnostic::UnsupportedStream {
            media_type: "video/x-theora".to_string()
        }
    ));
    assert_eq!(
        collapsed_states(&harness.client),
        vec![
            AppendState::Ongoing,
            AppendState::DataStarve,
            AppendState::NotStarted
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encrypted_stream_without_decryptor() {
    let harness = Harness::spawn();

    let chunk = SimContainer::new()
        .stream(
            0,
            StreamFormat::video("video/x-h264", 640, 360).encrypted(SYSTEM),
        )
        .samples(0, 2, 40)
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;

    let segments = harness.client.init_segments();
    assert_eq!(segments.len(), 1);
    assert!(segments[0].tracks.is_empty());
    assert!(harness.engine.detected().is_empty());
    assert!(harness.client.samples().is_empty());
    assert_eq!(
        harness.client.diagnostics(),
        vec![PipelineDiagnostic::MissingDecryptor {
            system_id: SYSTEM.to_string()
        }]
    );
    assert_eq!(
        harness.handle.append_state().await.unwrap(),
        AppendState::NotStarted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encrypted_stream_is_decrypted_after_key_negotiation() {
    let key = 0x5a;
    let factory = Arc::new(StaticDecryptorFactory::new().with_system(SYSTEM, key));
    let harness = Harness::spawn_with(factory.clone(), Arc::new(TrackIdRegistry::new()));

    let chunk = SimContainer::new()
        .need_context(&[SYSTEM])
        .stream(
            0,
            StreamFormat::video("video/x-h264", 640, 360)
                .with_codec("avc1.64001F")
                .encrypted(SYSTEM),
        )
        .sample_with_payload(0, 0, 0, 40, XorDecryptor::apply(key, b"secret frame"))
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;

    let samples = harness.client.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].payload().as_ref(), b"secret frame");

    let detected = harness.engine.detected();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].track.codec, "avc1.64001F");

    let requests = factory.context_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system_ids, vec![SYSTEM.to_string()]);
    assert_eq!(factory.lookups(), vec![SYSTEM.to_string()]);

    assert_eq!(
        collapsed_states(&harness.client),
        vec![
            AppendState::Ongoing,
            AppendState::KeyNegotiation,
            AppendState::Ongoing,
            AppendState::Sampling,
            AppendState::LastSample,
            AppendState::NotStarted
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_track_ids_are_unique_across_pipelines() {
    let track_ids = Arc::new(TrackIdRegistry::new());
    let video = Harness::spawn_with(
        Arc::new(msepipe_core::elements::NoDecryptors),
        Arc::clone(&track_ids),
    );
    let other = Harness::spawn_with(
        Arc::new(msepipe_core::elements::NoDecryptors),
        Arc::clone(&track_ids),
    );

    video
        .handle
        .append(SimContainer::single_video(1))
        .await
        .unwrap();
    video.wait_for_appends(1).await;
    other
        .handle
        .append(SimContainer::single_video(1))
        .await
        .unwrap();
    other.wait_for_appends(1).await;

    assert_eq!(video.engine.detected()[0].track.id.as_str(), "V1");
    assert_eq!(other.engine.detected()[0].track.id.as_str(), "V2");
    assert_ne!(video.handle.id(), other.handle.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_client_invalidates_pipeline() {
    let harness = Harness::spawn();
    let handle = harness.handle.clone();
    drop(harness);

    assert_eq!(
        handle.append(SimContainer::single_video(1)).await,
        Err(PipelineError::Invalidated)
    );

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        while handle.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "actor kept running without a client");
    assert_eq!(handle.abort().await, Err(PipelineError::Shutdown));
}
