//! Closed vocabularies shared by the reconciler core.
//!
//! Every tag the hosting system needs to recognise (statuses, targets, CI and
//! review results, agent tasks) is an enum here so adding a variant forces
//! every guard, projection rule and executor to handle it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the serialized tag vocabulary (`ActionKind`, `Target`, `Status`).
///
/// Bump when a tag is renamed or removed; adding a tag is backwards compatible.
pub const VOCABULARY_VERSION: u32 = 1;

/// Project-board status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Backlog,
    Ready,
    #[serde(rename = "In progress")]
    InProgress,
    #[serde(rename = "In review")]
    InReview,
    Done,
    Blocked,
    Error,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Backlog => "Backlog",
            Status::Ready => "Ready",
            Status::InProgress => "In progress",
            Status::InReview => "In review",
            Status::Done => "Done",
            Status::Blocked => "Blocked",
            Status::Error => "Error",
        }
    }

    /// Terminal statuses admit no further automation until a human resets them.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Blocked | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an item in the external tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    #[default]
    Open,
    Closed,
}

/// Merge state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    #[default]
    Open,
    Closed,
    Merged,
}

/// Conclusion of a CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiResult {
    Success,
    Failure,
    Cancelled,
}

/// Decision carried by a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Commented,
}

/// Target phase chosen by the transition engine for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Target {
    Triaging,
    Commenting,
    Orchestrating,
    Iterating,
    IteratingFix,
    CiCancelled,
    TransitioningToReview,
    Reviewing,
    AwaitingMerge,
    AddressingReview,
    ReviewCommented,
    VerificationFailed,
    Idle,
    Blocked,
    Done,
    Error,
}

impl Target {
    pub const fn as_str(self) -> &'static str {
        match self {
            Target::Triaging => "triaging",
            Target::Commenting => "commenting",
            Target::Orchestrating => "orchestrating",
            Target::Iterating => "iterating",
            Target::IteratingFix => "iteratingFix",
            Target::CiCancelled => "ciCancelled",
            Target::TransitioningToReview => "transitioningToReview",
            Target::Reviewing => "reviewing",
            Target::AwaitingMerge => "awaitingMerge",
            Target::AddressingReview => "addressingReview",
            Target::ReviewCommented => "reviewCommented",
            Target::VerificationFailed => "verificationFailed",
            Target::Idle => "idle",
            Target::Blocked => "blocked",
            Target::Done => "done",
            Target::Error => "error",
        }
    }

    /// Absorbing targets: once reached, no rule re-admits the item.
    pub const fn is_absorbing(self) -> bool {
        matches!(self, Target::Blocked | Target::Done | Target::Error)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an `invoke-agent` action asks the agent to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum AgentTask {
    Triage,
    Iterate,
    FixCi {
        run_url: Option<String>,
    },
    AddressReview {
        reviewer: String,
    },
    RespondToComment {
        author: String,
        body: String,
    },
}

impl AgentTask {
    /// Stable name used to select the prompt template and output schema.
    pub const fn name(&self) -> &'static str {
        match self {
            AgentTask::Triage => "triage",
            AgentTask::Iterate => "iterate",
            AgentTask::FixCi { .. } => "fix-ci",
            AgentTask::AddressReview { .. } => "address-review",
            AgentTask::RespondToComment { .. } => "respond-to-comment",
        }
    }
}
