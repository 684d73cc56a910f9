//! Outcome prediction: project an action list onto the current tree.
//!
//! Each action has a projection rule describing its effect on the
//! [`PredictableTree`]. Where the effect depends on state only known at
//! execution time the candidate bifurcates, so the result is a set of
//! acceptable trees rather than a single one.

use serde::{Deserialize, Serialize};

use crate::core::action::{Action, ActionKind};
use crate::core::selector::phase_label;
use crate::core::snapshot::{HistoryEntry, Snapshot};
use crate::core::tree::{PrTree, PredictableTree};
use crate::core::types::{ItemState, PrState, Status, Target, VOCABULARY_VERSION};

/// History text written when `create-or-update-pr` opens a new PR.
pub const OPENED_PR: &str = "Opened PR";
/// History text written when `create-or-update-pr` updates an existing PR.
pub const UPDATED_PR: &str = "Updated PR";

/// Decision context stored alongside the predicted trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictMeta {
    pub target: Target,
    pub rule: String,
    pub signal: String,
}

/// All acceptable post-execution trees for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSet {
    pub vocabulary_version: u32,
    pub item: u64,
    pub target: Target,
    pub rule: String,
    pub signal: String,
    pub actions: Vec<ActionKind>,
    pub outcomes: Vec<PredictableTree>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    tree: PredictableTree,
    stopped: bool,
}

impl Candidate {
    fn stop(mut self) -> Self {
        self.stopped = true;
        self
    }
}

/// Compute the outcome set for `actions` applied to `current`.
///
/// `snapshot` supplies context the tree does not carry (phase labels for
/// history rows written by executors). The returned set is never empty and
/// contains no duplicate trees.
pub fn predict(
    actions: &[Action],
    current: &PredictableTree,
    snapshot: &Snapshot,
    meta: &PredictMeta,
) -> OutcomeSet {
    let mut candidates = vec![Candidate {
        tree: current.clone(),
        stopped: false,
    }];

    for action in actions {
        let mut next = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.stopped {
                next.push(candidate);
            } else {
                next.extend(project(action, candidate, snapshot));
            }
        }
        candidates = next;
    }

    let mut outcomes: Vec<PredictableTree> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !outcomes.contains(&candidate.tree) {
            outcomes.push(candidate.tree);
        }
    }

    OutcomeSet {
        vocabulary_version: VOCABULARY_VERSION,
        item: current.issue.number,
        target: meta.target,
        rule: meta.rule.clone(),
        signal: meta.signal.clone(),
        actions: actions.iter().map(Action::kind).collect(),
        outcomes,
    }
}

/// Apply one action's projection rule. Returns one candidate, or two on
/// bifurcation.
fn project(action: &Action, mut candidate: Candidate, snapshot: &Snapshot) -> Vec<Candidate> {
    let Some(issue) = action.issue() else {
        // stop / log
        return vec![if action.is_terminal() {
            candidate.stop()
        } else {
            candidate
        }];
    };
    let Some(item) = candidate.tree.item_mut(issue) else {
        return vec![candidate];
    };

    match action {
        Action::SetStatus { status, .. } => item.status = Some(*status),
        Action::IncrementIteration { .. } => item.iteration = item.iteration.saturating_add(1),
        Action::RecordFailure { .. } => item.failures = item.failures.saturating_add(1),
        Action::ClearFailures { .. } => item.failures = 0,
        Action::AddLabels { labels, .. } => labels.iter().for_each(|l| item.add_label(l)),
        Action::RemoveLabels { labels, .. } => labels.iter().for_each(|l| item.remove_label(l)),
        Action::Assign { login, .. } => item.assign(login),
        Action::Unassign { login, .. } => item.unassign(login),
        Action::CreateBranch { .. } => item.has_branch = true,
        Action::PrepareBranch { .. } => {
            item.has_branch = true;
            let rebased = candidate.clone().stop();
            return vec![rebased, candidate];
        }
        Action::CreateOrUpdatePr { draft, .. } => {
            let entry_for = |text: &str, iteration: u32| {
                HistoryEntry::new(iteration, phase_label(snapshot, issue), text)
            };
            let had_pr = item.has_pr;
            item.has_pr = true;
            item.pr = Some(PrTree {
                is_draft: *draft,
                state: PrState::Open,
            });
            let iteration = item.iteration;
            if had_pr {
                item.body.history.push(entry_for(UPDATED_PR, iteration));
                return vec![candidate];
            }
            let mut updated = candidate.clone();
            if let Some(item) = candidate.tree.item_mut(issue) {
                item.body.history.push(entry_for(OPENED_PR, iteration));
            }
            if let Some(item) = updated.tree.item_mut(issue) {
                item.body.history.push(entry_for(UPDATED_PR, iteration));
            }
            return vec![candidate, updated];
        }
        Action::MarkPrReady { .. } => {
            if let Some(pr) = item.pr.as_mut() {
                pr.is_draft = false;
            }
        }
        Action::ConvertPrToDraft { .. } => {
            if let Some(pr) = item.pr.as_mut() {
                pr.is_draft = true;
            }
        }
        Action::AppendHistory { entry, .. } => item.body.history.push(entry.clone()),
        Action::CloseItem { .. } => item.state = ItemState::Closed,
        Action::ReopenItem { .. } => item.state = ItemState::Open,
        Action::Block { .. } => item.status = Some(Status::Blocked),
        Action::CreateComment { .. }
        | Action::RequestReview { .. }
        | Action::InvokeAgent { .. }
        | Action::ApplyTriageOutput { .. }
        | Action::ApplyIterationOutput { .. }
        | Action::PostAgentReply { .. }
        | Action::Stop { .. }
        | Action::Log { .. } => {}
    }

    if action.is_terminal() {
        candidate = candidate.stop();
    }
    vec![candidate]
}
