//! Append flow: chunks in, tracks and samples out.

use msepipe_core::elements::PushOutcome;
use msepipe_core::media::{EncodedChunk, MediaTime, PresentationSize, StreamFormat, StreamKind};
use msepipe_core::pipeline::{AppendState, PipelineDiagnostic};
use msepipe_core::sim::{ClientEvent, SimContainer};

use crate::common::{Harness, WAIT, collapsed_states};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_video_append_reports_track_then_samples() {
    let harness = Harness::spawn();

    let outcome = harness
        .handle
        .append(SimContainer::single_video(3))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Accepted);
    harness.wait_for_appends(1).await;

    let detected = harness.engine.detected();
    assert_eq!(detected.len(), 1);
    assert!(detected[0].is_first_track);
    assert_eq!(detected[0].pipeline, harness.handle.id());
    assert_eq!(detected[0].track.id.as_str(), "V1");
    assert_eq!(detected[0].track.kind, StreamKind::Video);
    assert_eq!(detected[0].track.codec, "avc1.42E01E");
    assert_eq!(
        detected[0].track.presentation_size,
        Some(PresentationSize::new(640, 360))
    );

    // Init segment precedes every sample, and the completion comes last.
    let events = harness.client.events();
    let init = events
        .iter()
        .position(|e| matches!(e, ClientEvent::InitializationSegment(_)))
        .unwrap();
    let first_sample = events
        .iter()
        .position(|e| matches!(e, ClientEvent::Sample(_)))
        .unwrap();
    let done = events
        .iter()
        .position(|e| matches!(e, ClientEvent::AllSamplesReceived))
        .unwrap();
    assert!(init < first_sample);
    assert!(events[first_sample..done]
        .iter()
        .all(|e| !matches!(e, ClientEvent::InitializationSegment(_))));

    let samples = harness.client.samples();
    assert_eq!(samples.len(), 3);
    let times: Vec<_> = samples.iter().map(|s| s.presentation_time()).collect();
    assert_eq!(
        times,
        vec![
            MediaTime::ZERO,
            MediaTime::from_millis(40),
            MediaTime::from_millis(80)
        ]
    );
    assert!(samples.iter().all(|s| s.track_id().as_str() == "V1"));
    assert_eq!(samples[1].payload().as_ref(), b"frame@40");

    assert_eq!(
        collapsed_states(&harness.client),
        vec![
            AppendState::Ongoing,
            AppendState::Sampling,
            AppendState::LastSample,
            AppendState::NotStarted
        ]
    );
    assert_eq!(
        harness.handle.append_state().await.unwrap(),
        AppendState::NotStarted
    );

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.chunks_pushed, 1);
    assert_eq!(stats.samples_delivered, 3);
    assert_eq!(stats.appends_completed, 1);
    assert_eq!(stats.invalid_transitions, 0);
    assert!(stats.first_buffer_departed);
    assert!(stats.has_track);

    harness.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_length_append_completes_without_samples() {
    let harness = Harness::spawn();

    harness
        .handle
        .append(EncodedChunk::from_static(b""))
        .await
        .unwrap();
    harness.wait_for_appends(1).await;

    assert!(harness.client.samples().is_empty());
    assert!(harness.engine.detected().is_empty());
    assert_eq!(
        harness.client.states(),
        vec![
            AppendState::Ongoing,
            AppendState::DataStarve,
            AppendState::NotStarted
        ]
    );
    assert_eq!(harness.chunks.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_appends_split_across_chunks() {
    let harness = Harness::spawn();

    let head = SimContainer::new()
        .stream(0, StreamFormat::audio("audio/mpeg").with_codec("mp4a.40.2"))
        .sample(0, 0, 0, 20)
        .encode();
    let tail = SimContainer::new().sample(0, 20, 20, 20).encode();

    harness.handle.push_chunk(head).await.unwrap();
    harness.handle.append(tail).await.unwrap();
    harness.wait_for_appends(1).await;

    assert_eq!(harness.client.samples().len(), 2);
    assert_eq!(harness.client.all_samples_received_count(), 1);
    assert_eq!(harness.client.init_segments().len(), 1);
    assert_eq!(harness.engine.detected()[0].track.id.as_str(), "A1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_append_reuses_linked_track() {
    let harness = Harness::spawn();

    harness
        .handle
        .append(SimContainer::single_video(2))
        .await
        .unwrap();
    harness.wait_for_appends(1).await;

    let more = SimContainer::new().sample(0, 80, 80, 40).encode();
    harness.handle.append(more).await.unwrap();
    harness.wait_for_appends(2).await;

    assert_eq!(harness.client.samples().len(), 3);
    assert_eq!(harness.engine.detected().len(), 1);
    assert_eq!(harness.client.init_segments().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_format_change_updates_existing_track() {
    let harness = Harness::spawn();

    let chunk = SimContainer::new()
        .stream(0, StreamFormat::video("video/x-h264", 640, 360))
        .sample(0, 0, 0, 40)
        .format(0, StreamFormat::video("video/x-h264", 1280, 720))
        .sample(0, 40, 40, 40)
        .encode();
    harness.handle.append(chunk).await.unwrap();
    harness.wait_for_appends(1).await;

    let changed: Vec<_> = harness
        .client
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::TrackFormatChanged(track) => Some(track),
            _ => None,
        })
        .collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed[0].presentation_size,
        Some(PresentationSize::new(1280, 720))
    );

    let samples = harness.client.samples();
    assert_eq!(
        samples[1].presentation_size(),
        Some(PresentationSize::new(1280, 720))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_of_stream_reaches_client() {
    let harness = Harness::spawn();

    harness
        .handle
        .append(SimContainer::single_video(1))
        .await
        .unwrap();
    harness.wait_for_appends(1).await;
    harness.handle.end_of_stream().await.unwrap();

    let reached = harness
        .client
        .wait_for(WAIT, |events| {
            events.iter().any(|e| matches!(e, ClientEvent::EndOfStream(_)))
        })
        .await;
    assert!(reached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_of_stream_before_any_append_is_accepted() -> anyhow::Result<()> {
    let harness = Harness::spawn();

    harness.handle.end_of_stream().await?;
    assert_eq!(harness.handle.append_state().await?, AppendState::NotStarted);
    assert!(harness.chunks.lock().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_chunk_reports_and_completes() {
    let harness = Harness::spawn();

    harness
        .handle
        .append(EncodedChunk::from_static(b"not a container"))
        .await
        .unwrap();
    harness.wait_for_appends(1).await;

    assert!(harness
        .client
        .diagnostics()
        .iter()
        .any(|d| matches!(d, PipelineDiagnostic::DemuxFailed { .. })));
    assert_eq!(
        harness.handle.append_state().await.unwrap(),
        AppendState::NotStarted
    );
}
