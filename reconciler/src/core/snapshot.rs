//! Immutable snapshot of everything a loop pass may read.
//!
//! The collaborator layer (`io::system`) builds a [`Snapshot`] per pass; the
//! core never mutates it.

use serde::{Deserialize, Serialize};

use crate::core::types::{CiResult, ItemState, PrState, Status};

/// Owner/repository pair identifying where items live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Repo {
    pub owner: String,
    pub name: String,
}

/// Pull request linked to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub is_draft: bool,
    pub state: PrState,
    /// Conclusion of the most recent CI run on the head commit, if any.
    #[serde(default)]
    pub ci: Option<CiResult>,
}

/// Checklist counters extracted from an item body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TodoStats {
    pub total: u32,
    pub completed: u32,
    /// Unchecked todos tagged for a human; the agent cannot complete these.
    pub manual_outstanding: u32,
}

impl TodoStats {
    /// Unchecked todos the agent is expected to finish.
    pub const fn outstanding_non_manual(&self) -> u32 {
        self.total
            .saturating_sub(self.completed)
            .saturating_sub(self.manual_outstanding)
    }
}

/// Question counters extracted from an item body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QuestionStats {
    pub total: u32,
    pub answered: u32,
}

/// One row of the iteration history table kept in an item body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    /// Phase label (`"1"`, `"2"`, ... or `"-"` for single-phase items).
    pub phase: String,
    pub action: String,
}

impl HistoryEntry {
    pub fn new(iteration: u32, phase: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            iteration,
            phase: phase.into(),
            action: action.into(),
        }
    }
}

/// Structured view of an item body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BodyStructure {
    pub has_description: bool,
    pub todos: TodoStats,
    pub history: Vec<HistoryEntry>,
    pub questions: QuestionStats,
    pub has_agent_notes: bool,
}

/// A trackable unit of work: a parent item or one of its phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: ItemState,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub has_branch: bool,
    #[serde(default)]
    pub pr: Option<PullRequest>,
    #[serde(default)]
    pub body: BodyStructure,
}

impl WorkItem {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_assigned_to(&self, login: &str) -> bool {
        self.assignees.iter().any(|a| a == login)
    }

    /// Done by status or closed in the tracker.
    pub fn is_done(&self) -> bool {
        self.status == Some(Status::Done) || self.state == ItemState::Closed
    }
}

/// Ordered child item of a multi-phase parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based phase number establishing total order.
    pub phase: u32,
    #[serde(flatten)]
    pub item: WorkItem,
}

/// Everything one pass observes about an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub repo: Repo,
    pub item: WorkItem,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl Snapshot {
    pub fn has_phases(&self) -> bool {
        !self.phases.is_empty()
    }

    /// Phase whose item number is `number`, if any.
    pub fn phase_by_item(&self, number: u64) -> Option<&Phase> {
        self.phases.iter().find(|phase| phase.item.number == number)
    }
}
