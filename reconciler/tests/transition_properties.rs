//! Property-based tests for derivation and prediction.
//!
//! - Derivation is deterministic for every snapshot/signal pair.
//! - The circuit breaker is monotone in the failure count.
//! - Every predicted outcome set is non-empty, duplicate-free, and each of its
//!   trees verifies against the set.

use proptest::prelude::*;
use reconciler::core::guards::EngineConfig;
use reconciler::core::machine::derive;
use reconciler::core::predict::{PredictMeta, predict};
use reconciler::core::signal::Signal;
use reconciler::core::snapshot::Snapshot;
use reconciler::core::tree::PredictableTree;
use reconciler::core::types::{CiResult, ReviewDecision, Status, Target};
use reconciler::core::verify::compare;
use reconciler::test_support::{open_pr, snapshot, working_item};

fn status_strategy() -> impl Strategy<Value = Option<Status>> {
    prop_oneof![
        Just(None),
        Just(Some(Status::Backlog)),
        Just(Some(Status::Ready)),
        Just(Some(Status::InProgress)),
        Just(Some(Status::InReview)),
    ]
}

fn signal_strategy() -> impl Strategy<Value = Signal> {
    prop_oneof![
        Just(Signal::Assigned),
        Just(Signal::Edited),
        Just(Signal::Triage),
        Just(Signal::PrMerged),
        Just(Signal::CiCompleted {
            result: CiResult::Failure,
            run_url: None,
        }),
        Just(Signal::CiCompleted {
            result: CiResult::Success,
            run_url: None,
        }),
        Just(Signal::CiCompleted {
            result: CiResult::Cancelled,
            run_url: None,
        }),
        Just(Signal::ReviewSubmitted {
            decision: ReviewDecision::ChangesRequested,
            reviewer: "octocat".to_string(),
        }),
        Just(Signal::VerificationFailed {
            summary: "status differs".to_string(),
        }),
    ]
}

fn snapshot_for(
    failures: u32,
    status: Option<Status>,
    with_pr: bool,
    todos: (u32, u32),
) -> Snapshot {
    let mut work = working_item(7);
    work.failures = failures;
    work.status = status;
    work.body.todos.total = todos.0;
    work.body.todos.completed = todos.1.min(todos.0);
    if with_pr {
        work.pr = Some(open_pr(70, true));
    }
    snapshot(work)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn derivation_is_deterministic(
        failures in 0u32..8,
        status in status_strategy(),
        with_pr in any::<bool>(),
        todos in (0u32..5, 0u32..5),
        signal in signal_strategy(),
    ) {
        let snap = snapshot_for(failures, status, with_pr, todos);
        let config = EngineConfig::default();
        let first = derive(&snap, &signal, &config);
        let second = derive(&snap, &signal, &config);
        prop_assert_eq!(first, second);
    }

    /// Once a failure signal trips the breaker, more failures keep it tripped.
    #[test]
    fn circuit_breaker_is_monotone(
        failures in 0u32..10,
        max_retries in 1u32..8,
        verification in any::<bool>(),
        with_pr in any::<bool>(),
    ) {
        let signal = if verification {
            Signal::VerificationFailed { summary: "drift".to_string() }
        } else {
            Signal::CiCompleted { result: CiResult::Failure, run_url: None }
        };
        let config = EngineConfig { max_retries, ..EngineConfig::default() };
        let blocked = |failures: u32| {
            let snap = snapshot_for(failures, Some(Status::InProgress), with_pr, (1, 0));
            derive(&snap, &signal, &config)
                .map(|t| t.target == Target::Blocked)
                .unwrap_or(false)
        };
        prop_assert_eq!(blocked(failures), failures >= max_retries);
        if blocked(failures) {
            prop_assert!(blocked(failures + 1));
        }
    }

    #[test]
    fn predicted_outcomes_verify_against_their_set(
        failures in 0u32..4,
        status in status_strategy(),
        with_pr in any::<bool>(),
        todos in (0u32..5, 0u32..5),
        signal in signal_strategy(),
    ) {
        let snap = snapshot_for(failures, status, with_pr, todos);
        let Ok(transition) = derive(&snap, &signal, &EngineConfig::default()) else {
            return Ok(());
        };
        let set = predict(
            &transition.actions,
            &PredictableTree::from_snapshot(&snap),
            &snap,
            &PredictMeta {
                target: transition.target,
                rule: transition.rule.to_string(),
                signal: signal.tag().to_string(),
            },
        );
        prop_assert!(!set.outcomes.is_empty());
        for (i, outcome) in set.outcomes.iter().enumerate() {
            prop_assert!(!set.outcomes[..i].contains(outcome));
            let verification = compare(&set, outcome).expect("compare");
            prop_assert!(verification.pass);
        }
    }
}
