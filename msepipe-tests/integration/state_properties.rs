//! Property tests over arbitrary push / abort / notify sequences.

use std::time::Duration;

use msepipe_core::pipeline::{AppendState, PipelineError};
use msepipe_core::sim::SimContainer;
use proptest::prelude::*;

use crate::common::{Harness, WAIT, transitions};

#[derive(Debug, Clone)]
enum Op {
    Push(usize),
    Abort,
    Notify,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..3).prop_map(Op::Push),
        1 => Just(Op::Abort),
        2 => Just(Op::Notify),
    ]
}

async fn run(ops: &[Op]) {
    let harness = Harness::spawn();

    for op in ops {
        match op {
            Op::Push(samples) => {
                match harness
                    .handle
                    .push_chunk(SimContainer::single_video(*samples))
                    .await
                {
                    Ok(_) | Err(PipelineError::SourceQueueFull) => {}
                    Err(e) => panic!("push failed: {e}"),
                }
            }
            Op::Abort => harness.handle.abort().await.unwrap(),
            Op::Notify => harness.handle.notify_no_more_input_data().await.unwrap(),
        }
    }

    // Keep closing appends until nothing is in flight or held back.
    let settled = tokio::time::timeout(WAIT, async {
        loop {
            let stats = harness.handle.stats().await.unwrap();
            if stats.state == AppendState::NotStarted && !stats.abort_pending {
                return stats;
            }
            harness.handle.notify_no_more_input_data().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let stats = settled.expect("pipeline never went idle");

    let seen = transitions(&harness.client);
    let mut current = AppendState::NotStarted;
    for (from, to) in &seen {
        assert_eq!(*from, current, "transition chain broken in {seen:?}");
        assert!(from.can_transition_to(*to), "{from} -> {to} applied");
        assert_ne!(*to, AppendState::Invalid);
        current = *to;
    }

    assert_eq!(stats.invalid_transitions, 0);
    assert_eq!(
        harness.client.all_samples_received_count() as u64,
        stats.appends_completed
    );
    assert_eq!(harness.client.samples().len() as u64, stats.samples_delivered);

    harness.handle.shutdown().await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_command_sequences_only_take_legal_transitions(
        ops in prop::collection::vec(op(), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run(&ops));
    }
}
