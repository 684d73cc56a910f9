//! Guard predicates evaluated by the transition rules.
//!
//! Every guard is a plain `fn(&Facts) -> bool` so rule tables can be
//! `static` and evaluation stays deterministic.

use crate::core::selector::{all_phases_done, current_phase};
use crate::core::signal::Signal;
use crate::core::snapshot::Snapshot;
use crate::core::types::{CiResult, ItemState, PrState, ReviewDecision, Status};

/// Label marking an item as already triaged.
pub const TRIAGED_LABEL: &str = "triaged";

/// Settings the guards and rule builders read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Failure budget before the circuit breaker trips.
    pub max_retries: u32,
    /// Login the automation runs as.
    pub bot_login: String,
    /// Reviewer requested when a PR becomes ready.
    pub reviewer: Option<String>,
    /// Branch name prefix; the item number is appended.
    pub branch_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            bot_login: "reconciler-bot".to_string(),
            reviewer: None,
            branch_prefix: "claude/issue".to_string(),
        }
    }
}

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub snapshot: &'a Snapshot,
    pub signal: &'a Signal,
    pub config: &'a EngineConfig,
}

pub type Guard = fn(&Facts<'_>) -> bool;

pub fn always(_: &Facts<'_>) -> bool {
    true
}

pub fn is_terminal(f: &Facts<'_>) -> bool {
    f.snapshot.item.status.is_some_and(Status::is_terminal)
}

pub fn is_closed(f: &Facts<'_>) -> bool {
    f.snapshot.item.state == ItemState::Closed
}

pub fn max_failures_reached(f: &Facts<'_>) -> bool {
    f.snapshot.item.failures >= f.config.max_retries
}

pub fn is_failure_signal(f: &Facts<'_>) -> bool {
    f.signal.is_failure()
}

/// Failure signal arrived with the budget already spent.
pub fn should_circuit_break(f: &Facts<'_>) -> bool {
    is_failure_signal(f) && max_failures_reached(f)
}

pub fn is_verification_failed(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::VerificationFailed { .. })
}

pub fn needs_triage(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::Triage) && !f.snapshot.item.has_label(TRIAGED_LABEL)
}

pub fn is_comment(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::Comment { .. })
}

pub fn is_assigned_to_bot(f: &Facts<'_>) -> bool {
    f.snapshot.item.is_assigned_to(&f.config.bot_login)
}

/// Automation is not assigned and the signal is not the assignment itself.
pub fn is_unattended(f: &Facts<'_>) -> bool {
    !is_assigned_to_bot(f) && !matches!(f.signal, Signal::Assigned)
}

pub fn is_ci_completed(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::CiCompleted { .. })
}

fn ci_result_is(f: &Facts<'_>, expected: CiResult) -> bool {
    matches!(f.signal, Signal::CiCompleted { result, .. } if *result == expected)
}

pub fn ci_failed(f: &Facts<'_>) -> bool {
    ci_result_is(f, CiResult::Failure)
}

pub fn ci_cancelled(f: &Facts<'_>) -> bool {
    ci_result_is(f, CiResult::Cancelled)
}

pub fn ci_passed(f: &Facts<'_>) -> bool {
    ci_result_is(f, CiResult::Success)
}

/// No unchecked todos remain that the agent is expected to finish.
pub fn todos_done(f: &Facts<'_>) -> bool {
    f.snapshot.item.body.todos.outstanding_non_manual() == 0
}

pub fn has_pr(f: &Facts<'_>) -> bool {
    f.snapshot
        .item
        .pr
        .as_ref()
        .is_some_and(|pr| pr.state == PrState::Open)
}

/// CI signal passed, todos done, and there is a PR to review.
pub fn ready_for_review(f: &Facts<'_>) -> bool {
    ci_passed(f) && todos_done(f) && has_pr(f)
}

/// Same as [`ready_for_review`] but reads the last CI result recorded on the PR.
pub fn pr_ready_for_review(f: &Facts<'_>) -> bool {
    let ci_green = f
        .snapshot
        .item
        .pr
        .as_ref()
        .is_some_and(|pr| pr.ci == Some(CiResult::Success));
    ci_green && todos_done(f) && has_pr(f)
}

pub fn is_in_review(f: &Facts<'_>) -> bool {
    f.snapshot.item.status == Some(Status::InReview)
}

pub fn is_review_submitted(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::ReviewSubmitted { .. })
}

fn review_decision_is(f: &Facts<'_>, expected: ReviewDecision) -> bool {
    matches!(f.signal, Signal::ReviewSubmitted { decision, .. } if *decision == expected)
}

pub fn review_approved(f: &Facts<'_>) -> bool {
    review_decision_is(f, ReviewDecision::Approved)
}

pub fn changes_requested(f: &Facts<'_>) -> bool {
    review_decision_is(f, ReviewDecision::ChangesRequested)
}

pub fn has_phases(f: &Facts<'_>) -> bool {
    f.snapshot.has_phases()
}

/// PR merged on a single-phase item.
pub fn single_item_merged(f: &Facts<'_>) -> bool {
    matches!(f.signal, Signal::PrMerged) && !has_phases(f)
}

pub fn phases_done(f: &Facts<'_>) -> bool {
    all_phases_done(f.snapshot)
}

/// Current phase stopped in `Blocked` or `Error`; only a human moves it on.
pub fn current_phase_stuck(f: &Facts<'_>) -> bool {
    current_phase(f.snapshot)
        .and_then(|phase| phase.item.status)
        .is_some_and(Status::is_terminal)
}

pub fn current_phase_in_progress(f: &Facts<'_>) -> bool {
    current_phase(f.snapshot).is_some_and(|phase| phase.item.status == Some(Status::InProgress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::PullRequest;
    use crate::test_support::{item, snapshot_with_phases};

    fn facts<'a>(snapshot: &'a Snapshot, signal: &'a Signal, config: &'a EngineConfig) -> Facts<'a> {
        Facts {
            snapshot,
            signal,
            config,
        }
    }

    #[test]
    fn circuit_break_requires_failure_signal_and_budget() {
        let config = EngineConfig::default();
        let mut parent = item(1);
        parent.failures = 5;
        let snapshot = snapshot_with_phases(parent, Vec::new());

        let failure = Signal::CiCompleted {
            result: CiResult::Failure,
            run_url: None,
        };
        assert!(should_circuit_break(&facts(&snapshot, &failure, &config)));
        assert!(!should_circuit_break(&facts(&snapshot, &Signal::Edited, &config)));
    }

    #[test]
    fn ready_for_review_combines_ci_todos_and_pr() {
        let config = EngineConfig::default();
        let mut parent = item(1);
        parent.body.todos.total = 2;
        parent.body.todos.completed = 2;
        parent.pr = Some(PullRequest {
            number: 9,
            is_draft: true,
            state: PrState::Open,
            ci: None,
        });
        let snapshot = snapshot_with_phases(parent, Vec::new());
        let success = Signal::CiCompleted {
            result: CiResult::Success,
            run_url: None,
        };
        assert!(ready_for_review(&facts(&snapshot, &success, &config)));

        let mut unfinished = snapshot.clone();
        unfinished.item.body.todos.completed = 1;
        assert!(!ready_for_review(&facts(&unfinished, &success, &config)));
    }

    #[test]
    fn manual_todos_do_not_block_review() {
        let config = EngineConfig::default();
        let mut parent = item(1);
        parent.body.todos.total = 3;
        parent.body.todos.completed = 2;
        parent.body.todos.manual_outstanding = 1;
        let snapshot = snapshot_with_phases(parent, Vec::new());
        assert!(todos_done(&facts(&snapshot, &Signal::Edited, &config)));
    }

    #[test]
    fn triage_skipped_once_labelled() {
        let config = EngineConfig::default();
        let mut parent = item(1);
        parent.labels.push(TRIAGED_LABEL.to_string());
        let snapshot = snapshot_with_phases(parent, Vec::new());
        assert!(!needs_triage(&facts(&snapshot, &Signal::Triage, &config)));
    }
}
