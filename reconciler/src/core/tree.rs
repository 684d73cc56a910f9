//! The projectable subset of a snapshot.
//!
//! [`PredictableTree`] drops everything prediction cannot reason about
//! (titles, PR numbers, CI results, repo identity) and keeps the fields the
//! projection rules write and the comparison rules read.

use serde::{Deserialize, Serialize};

use crate::core::snapshot::{HistoryEntry, Snapshot, WorkItem};
use crate::core::types::{ItemState, PrState, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrTree {
    pub is_draft: bool,
    pub state: PrState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BodyTree {
    pub has_description: bool,
    pub todo_total: u32,
    pub todo_completed: u32,
    pub question_total: u32,
    pub question_answered: u32,
    pub has_agent_notes: bool,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTree {
    pub number: u64,
    pub state: ItemState,
    pub status: Option<Status>,
    pub iteration: u32,
    pub failures: u32,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub has_branch: bool,
    pub has_pr: bool,
    pub pr: Option<PrTree>,
    pub body: BodyTree,
}

impl ItemTree {
    pub fn from_item(item: &WorkItem) -> Self {
        let body = &item.body;
        Self {
            number: item.number,
            state: item.state,
            status: item.status,
            iteration: item.iteration,
            failures: item.failures,
            labels: item.labels.clone(),
            assignees: item.assignees.clone(),
            has_branch: item.has_branch,
            has_pr: item.pr.is_some(),
            pr: item.pr.as_ref().map(|pr| PrTree {
                is_draft: pr.is_draft,
                state: pr.state,
            }),
            body: BodyTree {
                has_description: body.has_description,
                todo_total: body.todos.total,
                todo_completed: body.todos.completed,
                question_total: body.questions.total,
                question_answered: body.questions.answered,
                has_agent_notes: body.has_agent_notes,
                history: body.history.clone(),
            },
        }
    }

    pub(crate) fn add_label(&mut self, label: &str) {
        if !self.labels.iter().any(|l| l == label) {
            self.labels.push(label.to_string());
        }
    }

    pub(crate) fn remove_label(&mut self, label: &str) {
        self.labels.retain(|l| l != label);
    }

    pub(crate) fn assign(&mut self, login: &str) {
        if !self.assignees.iter().any(|a| a == login) {
            self.assignees.push(login.to_string());
        }
    }

    pub(crate) fn unassign(&mut self, login: &str) {
        self.assignees.retain(|a| a != login);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTree {
    pub phase: u32,
    pub item: ItemTree,
}

/// Root of a projected state: the parent item plus its phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictableTree {
    pub issue: ItemTree,
    #[serde(default)]
    pub phases: Vec<PhaseTree>,
}

impl PredictableTree {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut phases: Vec<PhaseTree> = snapshot
            .phases
            .iter()
            .map(|phase| PhaseTree {
                phase: phase.phase,
                item: ItemTree::from_item(&phase.item),
            })
            .collect();
        phases.sort_by_key(|phase| phase.phase);
        Self {
            issue: ItemTree::from_item(&snapshot.item),
            phases,
        }
    }

    /// Parent or phase item with the given number.
    pub fn item_mut(&mut self, number: u64) -> Option<&mut ItemTree> {
        if self.issue.number == number {
            return Some(&mut self.issue);
        }
        self.phases
            .iter_mut()
            .find(|phase| phase.item.number == number)
            .map(|phase| &mut phase.item)
    }

    pub fn item(&self, number: u64) -> Option<&ItemTree> {
        if self.issue.number == number {
            return Some(&self.issue);
        }
        self.phases
            .iter()
            .find(|phase| phase.item.number == number)
            .map(|phase| &phase.item)
    }
}
