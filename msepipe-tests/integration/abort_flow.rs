//! Abort handling: deferred aborts, held chunks, and idempotence.

use bytes::Bytes;
use msepipe_core::elements::PushOutcome;
use msepipe_core::media::EncodedChunk;
use msepipe_core::pipeline::{AppendState, PipelineError};
use msepipe_core::sim::SimContainer;
use tokio_test::{assert_err, assert_ok};

use crate::common::{Harness, collapsed_states, transitions};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_mid_append_waits_for_completion() {
    let harness = Harness::spawn();

    harness
        .handle
        .push_chunk(SimContainer::single_video(4))
        .await
        .unwrap();
    harness.handle.abort().await.unwrap();

    // Abort alone does not end the append.
    let stats = harness.handle.stats().await.unwrap();
    assert!(stats.abort_pending);
    assert_ne!(stats.state, AppendState::Aborting);

    harness.handle.notify_no_more_input_data().await.unwrap();
    harness.wait_for_appends(1).await;
    harness.wait_for_state(AppendState::NotStarted).await;

    assert_eq!(
        collapsed_states(&harness.client),
        vec![
            AppendState::Ongoing,
            AppendState::Sampling,
            AppendState::LastSample,
            AppendState::Aborting,
            AppendState::NotStarted
        ]
    );
    assert_eq!(harness.client.samples().len(), 4);

    let stats = harness.handle.stats().await.unwrap();
    assert!(!stats.abort_pending);
    assert!(!stats.has_track);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_during_abort_is_released_unchanged() {
    let harness = Harness::spawn();

    let first = SimContainer::single_video(2);
    let second = SimContainer::single_video(3);
    let second_bytes = Bytes::copy_from_slice(second.as_bytes());

    harness.handle.push_chunk(first).await.unwrap();
    harness.handle.abort().await.unwrap();
    assert_eq!(
        harness.handle.push_chunk(second).await.unwrap(),
        PushOutcome::Deferred
    );

    harness.handle.notify_no_more_input_data().await.unwrap();
    harness.wait_for_appends(1).await;
    harness
        .wait_for_transition(AppendState::NotStarted, AppendState::Ongoing, 2)
        .await;

    // The held chunk starts a fresh append once the abort has finished.
    let released: Vec<_> = transitions(&harness.client)
        .into_iter()
        .skip_while(|(_, to)| *to != AppendState::Aborting)
        .take(4)
        .collect();
    assert_eq!(
        released,
        vec![
            (AppendState::LastSample, AppendState::Aborting),
            (AppendState::Aborting, AppendState::NotStarted),
            (AppendState::NotStarted, AppendState::NotStarted),
            (AppendState::NotStarted, AppendState::Ongoing)
        ]
    );

    harness.handle.notify_no_more_input_data().await.unwrap();
    harness.wait_for_appends(2).await;

    let chunks = harness.chunks.lock().clone();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1], second_bytes);
    assert_eq!(*harness.flushes.lock(), 1);

    // The flushed demuxer re-announced the stream as a new track.
    let detected = harness.engine.detected();
    assert_eq!(detected.len(), 2);
    assert!(detected[0].is_first_track);
    assert!(!detected[1].is_first_track);
    assert_eq!(detected[1].track.id.as_str(), "V2");
    assert_eq!(harness.client.samples().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_append_behind_abort_completes() {
    let harness = Harness::spawn();

    assert_ok!(harness.handle.append(SimContainer::single_video(3)).await);
    assert_ok!(harness.handle.abort().await);

    // Held behind the abort unless the first append already finished.
    let outcome = assert_ok!(harness.handle.append(SimContainer::single_video(2)).await);
    assert!(matches!(
        outcome,
        PushOutcome::Deferred | PushOutcome::Accepted
    ));

    harness.wait_for_appends(2).await;
    harness.wait_for_state(AppendState::NotStarted).await;

    assert_eq!(harness.client.all_samples_received_count(), 2);
    assert_eq!(harness.client.samples().len(), 5);
    assert_eq!(harness.chunks.lock().len(), 2);

    let stats = assert_ok!(harness.handle.stats().await);
    assert_eq!(stats.appends_completed, 2);
    assert!(!stats.abort_pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_push_during_abort_is_rejected() {
    let harness = Harness::spawn();

    harness
        .handle
        .push_chunk(SimContainer::single_video(1))
        .await
        .unwrap();
    harness.handle.abort().await.unwrap();
    harness
        .handle
        .push_chunk(EncodedChunk::from_static(b""))
        .await
        .unwrap();

    let rejected = assert_err!(
        harness
            .handle
            .push_chunk(EncodedChunk::from_static(b""))
            .await
    );
    assert_eq!(rejected, PipelineError::SourceQueueFull);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reissued_abort_drops_held_chunk() {
    let harness = Harness::spawn();

    harness
        .handle
        .push_chunk(SimContainer::single_video(1))
        .await
        .unwrap();
    harness.handle.abort().await.unwrap();
    harness
        .handle
        .push_chunk(SimContainer::single_video(2))
        .await
        .unwrap();
    harness.handle.abort().await.unwrap();

    harness.handle.notify_no_more_input_data().await.unwrap();
    harness.wait_for_appends(1).await;
    harness.wait_for_state(AppendState::NotStarted).await;

    assert_eq!(harness.chunks.lock().len(), 1);
    assert_eq!(
        harness.handle.append_state().await.unwrap(),
        AppendState::NotStarted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_while_idle_is_idempotent() {
    let harness = Harness::spawn();

    harness.handle.abort().await.unwrap();
    harness.handle.abort().await.unwrap();

    assert_eq!(
        harness.client.states(),
        vec![
            AppendState::Aborting,
            AppendState::NotStarted,
            AppendState::Aborting,
            AppendState::NotStarted
        ]
    );
    assert_eq!(harness.client.all_samples_received_count(), 0);
    assert!(harness.chunks.lock().is_empty());

    // The pipeline still appends normally afterwards.
    harness
        .handle
        .append(SimContainer::single_video(1))
        .await
        .unwrap();
    harness.wait_for_appends(1).await;
    assert_eq!(harness.client.samples().len(), 1);
}
