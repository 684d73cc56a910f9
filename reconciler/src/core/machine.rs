//! Transition derivation: `(snapshot, signal) -> (target, actions)`.
//!
//! Rules are ordered lists of `(guard, then)` pairs evaluated top to bottom;
//! the first rule whose guard holds wins. A rule either emits a target with
//! its actions or descends into a nested list. Derivation is pure: the action
//! list is returned by value and nothing is accumulated in shared state.

use serde::Serialize;
use thiserror::Error;

use crate::core::action::Action;
use crate::core::guards::{
    EngineConfig, Facts, Guard, TRIAGED_LABEL, always, changes_requested, ci_cancelled,
    ci_failed, current_phase_in_progress, current_phase_stuck, has_phases, is_ci_completed, is_closed, is_comment,
    is_in_review, is_review_submitted, is_terminal, is_unattended, is_verification_failed,
    needs_triage, phases_done, pr_ready_for_review, ready_for_review, review_approved,
    should_circuit_break, single_item_merged,
};
use crate::core::invariants::validate_snapshot;
use crate::core::selector::current_phase;
use crate::core::signal::Signal;
use crate::core::snapshot::{HistoryEntry, Snapshot, WorkItem};
use crate::core::types::{AgentTask, Status, Target};

/// Label added once a PR has been approved.
pub const READY_TO_MERGE_LABEL: &str = "ready-to-merge";

/// Contract violations detected before any rule is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    #[error("invalid snapshot:\n- {}", .0.join("\n- "))]
    InvalidSnapshot(Vec<String>),
    #[error("invalid {tag} signal: {}", errors.join("; "))]
    InvalidSignal {
        tag: &'static str,
        errors: Vec<String>,
    },
    #[error("no rule in '{list}' matched signal '{signal}'")]
    NoRuleMatched {
        list: &'static str,
        signal: &'static str,
    },
}

/// Result of one derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub target: Target,
    /// Name of the rule that fired (for logs and reports).
    pub rule: &'static str,
    pub actions: Vec<Action>,
}

type Build = fn(&Facts<'_>) -> (Target, Vec<Action>);

enum Then {
    Emit(Build),
    Descend(&'static RuleList),
}

struct Rule {
    name: &'static str,
    guard: Guard,
    then: Then,
}

struct RuleList {
    name: &'static str,
    rules: &'static [Rule],
}

static DETECTING: RuleList = RuleList {
    name: "detecting",
    rules: &[
        Rule {
            name: "terminal-status",
            guard: is_terminal,
            then: Then::Emit(terminal_status),
        },
        Rule {
            name: "closed",
            guard: is_closed,
            then: Then::Emit(closed),
        },
        Rule {
            name: "circuit-breaker",
            guard: should_circuit_break,
            then: Then::Emit(circuit_break),
        },
        Rule {
            name: "verification-failed",
            guard: is_verification_failed,
            then: Then::Emit(verification_failed),
        },
        Rule {
            name: "triage",
            guard: needs_triage,
            then: Then::Emit(triage),
        },
        Rule {
            name: "comment",
            guard: is_comment,
            then: Then::Emit(respond_to_comment),
        },
        Rule {
            name: "unattended",
            guard: is_unattended,
            then: Then::Emit(idle),
        },
        Rule {
            name: "ci",
            guard: is_ci_completed,
            then: Then::Descend(&PROCESSING_CI),
        },
        Rule {
            name: "review",
            guard: is_review_submitted,
            then: Then::Descend(&PROCESSING_REVIEW),
        },
        Rule {
            name: "merged",
            guard: single_item_merged,
            then: Then::Emit(merged),
        },
        Rule {
            name: "orchestrate",
            guard: has_phases,
            then: Then::Descend(&ORCHESTRATING),
        },
        Rule {
            name: "iterate",
            guard: always,
            then: Then::Descend(&ITERATING),
        },
    ],
};

static PROCESSING_CI: RuleList = RuleList {
    name: "processingCi",
    rules: &[
        Rule {
            name: "ci.failed",
            guard: ci_failed,
            then: Then::Emit(fix_ci),
        },
        Rule {
            name: "ci.cancelled",
            guard: ci_cancelled,
            then: Then::Emit(ci_was_cancelled),
        },
        Rule {
            name: "ci.ready-for-review",
            guard: ready_for_review,
            then: Then::Emit(transition_to_review),
        },
        Rule {
            name: "ci.passed",
            guard: always,
            then: Then::Emit(continue_after_green),
        },
    ],
};

static PROCESSING_REVIEW: RuleList = RuleList {
    name: "processingReview",
    rules: &[
        Rule {
            name: "review.approved",
            guard: review_approved,
            then: Then::Emit(await_merge),
        },
        Rule {
            name: "review.changes-requested",
            guard: changes_requested,
            then: Then::Emit(address_review),
        },
        Rule {
            name: "review.commented",
            guard: always,
            then: Then::Emit(review_commented),
        },
    ],
};

static ORCHESTRATING: RuleList = RuleList {
    name: "orchestrating",
    rules: &[
        Rule {
            name: "orchestrate.complete",
            guard: phases_done,
            then: Then::Emit(complete_phases),
        },
        Rule {
            name: "orchestrate.phase-stuck",
            guard: current_phase_stuck,
            then: Then::Emit(phase_stuck),
        },
        Rule {
            name: "orchestrate.wait",
            guard: current_phase_in_progress,
            then: Then::Emit(wait_on_phase),
        },
        Rule {
            name: "orchestrate.start-phase",
            guard: always,
            then: Then::Emit(start_phase),
        },
    ],
};

static ITERATING: RuleList = RuleList {
    name: "iterating",
    rules: &[
        Rule {
            name: "iterate.in-review",
            guard: is_in_review,
            then: Then::Emit(wait_for_review),
        },
        Rule {
            name: "iterate.ready-for-review",
            guard: pr_ready_for_review,
            then: Then::Emit(request_review),
        },
        Rule {
            name: "iterate.continue",
            guard: always,
            then: Then::Emit(iterate),
        },
    ],
};

/// Derives transitions from snapshots using the configured budget and logins.
#[derive(Debug, Clone, Default)]
pub struct TransitionEngine {
    config: EngineConfig,
}

impl TransitionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Map a snapshot and signal to a target and an ordered action list.
    ///
    /// Fails only on malformed input; business outcomes are transitions.
    pub fn derive(&self, snapshot: &Snapshot, signal: &Signal) -> Result<Transition, DeriveError> {
        let errors = validate_snapshot(snapshot);
        if !errors.is_empty() {
            return Err(DeriveError::InvalidSnapshot(errors));
        }
        let errors = signal.validate();
        if !errors.is_empty() {
            return Err(DeriveError::InvalidSignal {
                tag: signal.tag(),
                errors,
            });
        }
        let facts = Facts {
            snapshot,
            signal,
            config: &self.config,
        };
        evaluate(&DETECTING, &facts)
    }
}

/// Convenience wrapper for a one-off derivation.
pub fn derive(
    snapshot: &Snapshot,
    signal: &Signal,
    config: &EngineConfig,
) -> Result<Transition, DeriveError> {
    TransitionEngine::new(config.clone()).derive(snapshot, signal)
}

fn evaluate(list: &'static RuleList, facts: &Facts<'_>) -> Result<Transition, DeriveError> {
    let rule = list
        .rules
        .iter()
        .find(|rule| (rule.guard)(facts))
        .ok_or(DeriveError::NoRuleMatched {
            list: list.name,
            signal: facts.signal.tag(),
        })?;
    match rule.then {
        Then::Emit(build) => {
            let (target, actions) = build(facts);
            Ok(Transition {
                target,
                rule: rule.name,
                actions,
            })
        }
        Then::Descend(nested) => evaluate(nested, facts),
    }
}

fn subject<'a>(f: &Facts<'a>) -> &'a WorkItem {
    &f.snapshot.item
}

fn branch_name(f: &Facts<'_>) -> String {
    format!(
        "{}/{}",
        f.config.branch_prefix.trim_end_matches('/'),
        subject(f).number
    )
}

fn pr_title(item: &WorkItem) -> String {
    if item.title.trim().is_empty() {
        format!("Resolve #{}", item.number)
    } else {
        item.title.trim().to_string()
    }
}

fn history(issue: u64, iteration: u32, phase: &str, action: &str) -> Action {
    Action::AppendHistory {
        issue,
        entry: HistoryEntry::new(iteration, phase, action),
    }
}

fn terminal_status(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let target = match subject(f).status {
        Some(Status::Done) => Target::Done,
        Some(Status::Blocked) => Target::Blocked,
        _ => Target::Error,
    };
    (target, Vec::new())
}

fn closed(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = vec![Action::SetStatus {
        issue: subject(f).number,
        status: Status::Done,
    }];
    (Target::Done, actions)
}

fn circuit_break(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let reason = format!(
        "{} failures reached the retry budget of {} (last signal: {})",
        item.failures,
        f.config.max_retries,
        f.signal.tag()
    );
    let actions = vec![
        Action::SetStatus {
            issue: item.number,
            status: Status::Blocked,
        },
        Action::Unassign {
            issue: item.number,
            login: f.config.bot_login.clone(),
        },
        history(item.number, item.iteration, "-", "Blocked: retry budget exhausted"),
        Action::Block {
            issue: item.number,
            reason,
        },
    ];
    (Target::Blocked, actions)
}

fn verification_failed(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let summary = match f.signal {
        Signal::VerificationFailed { summary } => summary.as_str(),
        _ => "",
    };
    let actions = vec![
        Action::RecordFailure { issue: item.number },
        Action::Unassign {
            issue: item.number,
            login: f.config.bot_login.clone(),
        },
        history(item.number, item.iteration, "-", "Verification failed"),
        Action::CreateComment {
            issue: item.number,
            body: format!(
                "Automation paused: the last run did not produce the expected state.\n\n{summary}"
            ),
        },
    ];
    (Target::VerificationFailed, actions)
}

fn triage(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let mut actions = vec![
        Action::InvokeAgent {
            issue: item.number,
            task: AgentTask::Triage,
        },
        Action::ApplyTriageOutput { issue: item.number },
        Action::AddLabels {
            issue: item.number,
            labels: vec![TRIAGED_LABEL.to_string()],
        },
    ];
    if matches!(item.status, None | Some(Status::Backlog)) {
        actions.push(Action::SetStatus {
            issue: item.number,
            status: Status::Ready,
        });
    }
    actions.push(history(item.number, item.iteration, "-", "Triaged"));
    (Target::Triaging, actions)
}

fn respond_to_comment(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let (author, body) = match f.signal {
        Signal::Comment { author, body } => (author.clone(), body.clone()),
        _ => (String::new(), String::new()),
    };
    let actions = vec![
        Action::InvokeAgent {
            issue: item.number,
            task: AgentTask::RespondToComment { author, body },
        },
        Action::PostAgentReply { issue: item.number },
    ];
    (Target::Commenting, actions)
}

fn idle(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = vec![Action::Log {
        message: format!(
            "{} is not assigned to #{}; ignoring {}",
            f.config.bot_login,
            subject(f).number,
            f.signal.tag()
        ),
    }];
    (Target::Idle, actions)
}

struct IterationPlan {
    task: AgentTask,
    label: &'static str,
    record_failure: bool,
    clear_failures: bool,
}

/// Shared action sequence for every agent iteration on a single item.
fn iteration_actions(f: &Facts<'_>, plan: IterationPlan) -> Vec<Action> {
    let item = subject(f);
    let issue = item.number;
    let branch = branch_name(f);
    let mut actions = Vec::new();

    if plan.record_failure {
        actions.push(Action::RecordFailure { issue });
    }
    if plan.clear_failures && item.failures > 0 {
        actions.push(Action::ClearFailures { issue });
    }
    if item.status != Some(Status::InProgress) {
        actions.push(Action::SetStatus {
            issue,
            status: Status::InProgress,
        });
    }
    if item.has_branch {
        actions.push(Action::PrepareBranch {
            issue,
            branch: branch.clone(),
        });
    } else {
        actions.push(Action::CreateBranch {
            issue,
            branch: branch.clone(),
        });
    }
    actions.push(Action::IncrementIteration { issue });
    actions.push(history(issue, item.iteration.saturating_add(1), "-", plan.label));
    actions.push(Action::InvokeAgent {
        issue,
        task: plan.task,
    });
    actions.push(Action::ApplyIterationOutput { issue });
    actions.push(Action::CreateOrUpdatePr {
        issue,
        branch,
        title: pr_title(item),
        draft: true,
    });
    actions
}

fn fix_ci(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let run_url = match f.signal {
        Signal::CiCompleted { run_url, .. } => run_url.clone(),
        _ => None,
    };
    let actions = iteration_actions(
        f,
        IterationPlan {
            task: AgentTask::FixCi { run_url },
            label: "CI failed",
            record_failure: true,
            clear_failures: false,
        },
    );
    (Target::IteratingFix, actions)
}

fn ci_was_cancelled(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = vec![Action::Log {
        message: format!(
            "CI cancelled for #{}; waiting for the next run",
            subject(f).number
        ),
    }];
    (Target::CiCancelled, actions)
}

fn review_actions(f: &Facts<'_>) -> Vec<Action> {
    let item = subject(f);
    let issue = item.number;
    let mut actions = Vec::new();
    if item.failures > 0 {
        actions.push(Action::ClearFailures { issue });
    }
    if item.pr.as_ref().is_some_and(|pr| pr.is_draft) {
        actions.push(Action::MarkPrReady { issue });
    }
    actions.push(Action::SetStatus {
        issue,
        status: Status::InReview,
    });
    if let Some(reviewer) = &f.config.reviewer {
        actions.push(Action::RequestReview {
            issue,
            reviewer: reviewer.clone(),
        });
    }
    actions.push(history(issue, item.iteration, "-", "Ready for review"));
    actions
}

fn transition_to_review(f: &Facts<'_>) -> (Target, Vec<Action>) {
    (Target::TransitioningToReview, review_actions(f))
}

fn continue_after_green(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = iteration_actions(
        f,
        IterationPlan {
            task: AgentTask::Iterate,
            label: "CI passed",
            record_failure: false,
            clear_failures: true,
        },
    );
    (Target::Iterating, actions)
}

fn await_merge(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let actions = vec![
        history(item.number, item.iteration, "-", "Review approved"),
        Action::AddLabels {
            issue: item.number,
            labels: vec![READY_TO_MERGE_LABEL.to_string()],
        },
    ];
    (Target::AwaitingMerge, actions)
}

fn address_review(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let reviewer = match f.signal {
        Signal::ReviewSubmitted { reviewer, .. } => reviewer.clone(),
        _ => String::new(),
    };
    let mut actions = Vec::new();
    if item.pr.as_ref().is_some_and(|pr| !pr.is_draft) {
        actions.push(Action::ConvertPrToDraft { issue: item.number });
    }
    actions.extend(iteration_actions(
        f,
        IterationPlan {
            task: AgentTask::AddressReview { reviewer },
            label: "Addressing review",
            record_failure: false,
            clear_failures: false,
        },
    ));
    (Target::AddressingReview, actions)
}

fn review_commented(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = vec![Action::Log {
        message: format!(
            "review comment on #{} requires no transition",
            subject(f).number
        ),
    }];
    (Target::ReviewCommented, actions)
}

fn merged(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let actions = vec![
        Action::SetStatus {
            issue: item.number,
            status: Status::Done,
        },
        history(item.number, item.iteration, "-", "PR merged"),
        Action::CloseItem { issue: item.number },
    ];
    (Target::Done, actions)
}

fn complete_phases(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let item = subject(f);
    let actions = vec![
        Action::SetStatus {
            issue: item.number,
            status: Status::Done,
        },
        history(item.number, item.iteration, "-", "All phases complete"),
        Action::CloseItem { issue: item.number },
    ];
    (Target::Done, actions)
}

fn wait_on_phase(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let message = match current_phase(f.snapshot) {
        Some(phase) => format!(
            "waiting on phase {} (#{})",
            phase.phase, phase.item.number
        ),
        None => "waiting on current phase".to_string(),
    };
    (Target::Orchestrating, vec![Action::Log { message }])
}

/// Parent blocks on a blocked or errored phase; the phase itself is left alone.
fn phase_stuck(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let parent = subject(f);
    let Some(phase) = current_phase(f.snapshot) else {
        return wait_on_phase(f);
    };
    let status = phase.item.status.unwrap_or(Status::Blocked);
    let mut actions = vec![Action::SetStatus {
        issue: parent.number,
        status: Status::Blocked,
    }];
    if parent.is_assigned_to(&f.config.bot_login) {
        actions.push(Action::Unassign {
            issue: parent.number,
            login: f.config.bot_login.clone(),
        });
    }
    actions.push(history(
        parent.number,
        parent.iteration,
        &phase.phase.to_string(),
        &format!("Blocked: phase {} is {status}", phase.phase),
    ));
    actions.push(Action::Block {
        issue: parent.number,
        reason: format!("phase {} (#{}) is {status}", phase.phase, phase.item.number),
    });
    (Target::Blocked, actions)
}

fn start_phase(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let parent = subject(f);
    let Some(phase) = current_phase(f.snapshot) else {
        return wait_on_phase(f);
    };
    let mut actions = Vec::new();
    if parent.status != Some(Status::InProgress) {
        actions.push(Action::SetStatus {
            issue: parent.number,
            status: Status::InProgress,
        });
    }
    actions.push(Action::SetStatus {
        issue: phase.item.number,
        status: Status::InProgress,
    });
    if !phase.item.is_assigned_to(&f.config.bot_login) {
        actions.push(Action::Assign {
            issue: phase.item.number,
            login: f.config.bot_login.clone(),
        });
    }
    actions.push(history(
        parent.number,
        parent.iteration,
        &phase.phase.to_string(),
        &format!("Started phase {}", phase.phase),
    ));
    (Target::Orchestrating, actions)
}

fn wait_for_review(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = vec![Action::Log {
        message: format!("#{} is awaiting review", subject(f).number),
    }];
    (Target::Reviewing, actions)
}

fn request_review(f: &Facts<'_>) -> (Target, Vec<Action>) {
    (Target::Reviewing, review_actions(f))
}

fn iterate(f: &Facts<'_>) -> (Target, Vec<Action>) {
    let actions = iteration_actions(
        f,
        IterationPlan {
            task: AgentTask::Iterate,
            label: "Iterating",
            record_failure: false,
            clear_failures: false,
        },
    );
    (Target::Iterating, actions)
}
