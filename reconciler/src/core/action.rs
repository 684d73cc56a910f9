//! Effect descriptors produced by derivation and consumed by the runner.
//!
//! An [`Action`] carries only the data its executor needs; it has no
//! behavior of its own. [`ActionKind`] is the fieldless tag used for
//! dispatch, stop policy and the serialized vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::snapshot::HistoryEntry;
use crate::core::types::{AgentTask, Status};

/// One intended effect against the external system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    SetStatus { issue: u64, status: Status },
    IncrementIteration { issue: u64 },
    RecordFailure { issue: u64 },
    ClearFailures { issue: u64 },
    AddLabels { issue: u64, labels: Vec<String> },
    RemoveLabels { issue: u64, labels: Vec<String> },
    Assign { issue: u64, login: String },
    Unassign { issue: u64, login: String },
    CreateComment { issue: u64, body: String },
    CreateBranch { issue: u64, branch: String },
    /// Rebase the branch onto the default branch; may end the pass early.
    PrepareBranch { issue: u64, branch: String },
    /// Open a PR for `branch`, or update the one that already exists.
    CreateOrUpdatePr {
        issue: u64,
        branch: String,
        title: String,
        draft: bool,
    },
    MarkPrReady { issue: u64 },
    ConvertPrToDraft { issue: u64 },
    RequestReview { issue: u64, reviewer: String },
    InvokeAgent { issue: u64, task: AgentTask },
    /// Apply the triage payload produced by the preceding `invoke-agent`.
    ApplyTriageOutput { issue: u64 },
    /// Apply the iteration payload produced by the preceding `invoke-agent`.
    ApplyIterationOutput { issue: u64 },
    /// Post the reply produced by the preceding `invoke-agent`.
    PostAgentReply { issue: u64 },
    AppendHistory { issue: u64, entry: HistoryEntry },
    CloseItem { issue: u64 },
    ReopenItem { issue: u64 },
    /// Record why automation stopped; ends the run.
    Block { issue: u64, reason: String },
    /// End the run without further effects.
    Stop { reason: String },
    /// Informational only.
    Log { message: String },
}

/// Fieldless tag of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    SetStatus,
    IncrementIteration,
    RecordFailure,
    ClearFailures,
    AddLabels,
    RemoveLabels,
    Assign,
    Unassign,
    CreateComment,
    CreateBranch,
    PrepareBranch,
    CreateOrUpdatePr,
    MarkPrReady,
    ConvertPrToDraft,
    RequestReview,
    InvokeAgent,
    ApplyTriageOutput,
    ApplyIterationOutput,
    PostAgentReply,
    AppendHistory,
    CloseItem,
    ReopenItem,
    Block,
    Stop,
    Log,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActionKind; 25] = [
        ActionKind::SetStatus,
        ActionKind::IncrementIteration,
        ActionKind::RecordFailure,
        ActionKind::ClearFailures,
        ActionKind::AddLabels,
        ActionKind::RemoveLabels,
        ActionKind::Assign,
        ActionKind::Unassign,
        ActionKind::CreateComment,
        ActionKind::CreateBranch,
        ActionKind::PrepareBranch,
        ActionKind::CreateOrUpdatePr,
        ActionKind::MarkPrReady,
        ActionKind::ConvertPrToDraft,
        ActionKind::RequestReview,
        ActionKind::InvokeAgent,
        ActionKind::ApplyTriageOutput,
        ActionKind::ApplyIterationOutput,
        ActionKind::PostAgentReply,
        ActionKind::AppendHistory,
        ActionKind::CloseItem,
        ActionKind::ReopenItem,
        ActionKind::Block,
        ActionKind::Stop,
        ActionKind::Log,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ActionKind::SetStatus => "set-status",
            ActionKind::IncrementIteration => "increment-iteration",
            ActionKind::RecordFailure => "record-failure",
            ActionKind::ClearFailures => "clear-failures",
            ActionKind::AddLabels => "add-labels",
            ActionKind::RemoveLabels => "remove-labels",
            ActionKind::Assign => "assign",
            ActionKind::Unassign => "unassign",
            ActionKind::CreateComment => "create-comment",
            ActionKind::CreateBranch => "create-branch",
            ActionKind::PrepareBranch => "prepare-branch",
            ActionKind::CreateOrUpdatePr => "create-or-update-pr",
            ActionKind::MarkPrReady => "mark-pr-ready",
            ActionKind::ConvertPrToDraft => "convert-pr-to-draft",
            ActionKind::RequestReview => "request-review",
            ActionKind::InvokeAgent => "invoke-agent",
            ActionKind::ApplyTriageOutput => "apply-triage-output",
            ActionKind::ApplyIterationOutput => "apply-iteration-output",
            ActionKind::PostAgentReply => "post-agent-reply",
            ActionKind::AppendHistory => "append-history",
            ActionKind::CloseItem => "close-item",
            ActionKind::ReopenItem => "reopen-item",
            ActionKind::Block => "block",
            ActionKind::Stop => "stop",
            ActionKind::Log => "log",
        }
    }

    /// A terminal action ends the run successfully once it has executed.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionKind::Block | ActionKind::Stop | ActionKind::CloseItem
        )
    }

    /// Whether a failure of this kind aborts the rest of the run.
    pub const fn stops_on_error(self) -> bool {
        !matches!(
            self,
            ActionKind::Log | ActionKind::CreateComment | ActionKind::RequestReview
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub const fn kind(&self) -> ActionKind {
        match self {
            Action::SetStatus { .. } => ActionKind::SetStatus,
            Action::IncrementIteration { .. } => ActionKind::IncrementIteration,
            Action::RecordFailure { .. } => ActionKind::RecordFailure,
            Action::ClearFailures { .. } => ActionKind::ClearFailures,
            Action::AddLabels { .. } => ActionKind::AddLabels,
            Action::RemoveLabels { .. } => ActionKind::RemoveLabels,
            Action::Assign { .. } => ActionKind::Assign,
            Action::Unassign { .. } => ActionKind::Unassign,
            Action::CreateComment { .. } => ActionKind::CreateComment,
            Action::CreateBranch { .. } => ActionKind::CreateBranch,
            Action::PrepareBranch { .. } => ActionKind::PrepareBranch,
            Action::CreateOrUpdatePr { .. } => ActionKind::CreateOrUpdatePr,
            Action::MarkPrReady { .. } => ActionKind::MarkPrReady,
            Action::ConvertPrToDraft { .. } => ActionKind::ConvertPrToDraft,
            Action::RequestReview { .. } => ActionKind::RequestReview,
            Action::InvokeAgent { .. } => ActionKind::InvokeAgent,
            Action::ApplyTriageOutput { .. } => ActionKind::ApplyTriageOutput,
            Action::ApplyIterationOutput { .. } => ActionKind::ApplyIterationOutput,
            Action::PostAgentReply { .. } => ActionKind::PostAgentReply,
            Action::AppendHistory { .. } => ActionKind::AppendHistory,
            Action::CloseItem { .. } => ActionKind::CloseItem,
            Action::ReopenItem { .. } => ActionKind::ReopenItem,
            Action::Block { .. } => ActionKind::Block,
            Action::Stop { .. } => ActionKind::Stop,
            Action::Log { .. } => ActionKind::Log,
        }
    }

    /// Item the action targets; `None` for run-control actions.
    pub const fn issue(&self) -> Option<u64> {
        match self {
            Action::SetStatus { issue, .. }
            | Action::IncrementIteration { issue }
            | Action::RecordFailure { issue }
            | Action::ClearFailures { issue }
            | Action::AddLabels { issue, .. }
            | Action::RemoveLabels { issue, .. }
            | Action::Assign { issue, .. }
            | Action::Unassign { issue, .. }
            | Action::CreateComment { issue, .. }
            | Action::CreateBranch { issue, .. }
            | Action::PrepareBranch { issue, .. }
            | Action::CreateOrUpdatePr { issue, .. }
            | Action::MarkPrReady { issue }
            | Action::ConvertPrToDraft { issue }
            | Action::RequestReview { issue, .. }
            | Action::InvokeAgent { issue, .. }
            | Action::ApplyTriageOutput { issue }
            | Action::ApplyIterationOutput { issue }
            | Action::PostAgentReply { issue }
            | Action::AppendHistory { issue, .. }
            | Action::CloseItem { issue }
            | Action::ReopenItem { issue }
            | Action::Block { issue, .. } => Some(*issue),
            Action::Stop { .. } | Action::Log { .. } => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// Render a compact one-line list of action tags (`set-status, append-history`).
pub fn describe_actions(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|action| action.kind().as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
