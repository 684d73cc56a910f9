//! Tracked-item system abstraction.
//!
//! The [`IssueSystem`] trait is the seam between the runner's executors and
//! whatever hosts the items (a file store locally, a hosted tracker in
//! production). One mutation primitive per action concern; tests use an
//! in-memory implementation with failure injection.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::snapshot::{BodyStructure, Snapshot, WorkItem};
use crate::core::types::{ItemState, Status};

/// Outcome of bringing an item branch up to date with the default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchSync {
    UpToDate,
    /// A rebase was pushed; CI restarts and the current pass must end.
    Rebased,
}

/// Result of `create_or_update_pr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrUpdate {
    pub number: u64,
    pub created: bool,
}

pub trait IssueSystem {
    /// Snapshot of `number` and its phases.
    fn fetch(&self, number: u64) -> Result<Snapshot>;

    /// Current state of a single item (parent or phase).
    fn item(&self, issue: u64) -> Result<WorkItem>;

    fn set_status(&mut self, issue: u64, status: Status) -> Result<()>;

    /// Returns the new iteration count.
    fn increment_iteration(&mut self, issue: u64) -> Result<u32>;

    /// Returns the new failure count.
    fn record_failure(&mut self, issue: u64) -> Result<u32>;

    fn clear_failures(&mut self, issue: u64) -> Result<()>;

    fn add_labels(&mut self, issue: u64, labels: &[String]) -> Result<()>;

    fn remove_labels(&mut self, issue: u64, labels: &[String]) -> Result<()>;

    fn assign(&mut self, issue: u64, login: &str) -> Result<()>;

    fn unassign(&mut self, issue: u64, login: &str) -> Result<()>;

    /// Returns the new comment id.
    fn create_comment(&mut self, issue: u64, body: &str) -> Result<u64>;

    fn create_branch(&mut self, issue: u64, branch: &str) -> Result<()>;

    fn prepare_branch(&mut self, issue: u64, branch: &str) -> Result<BranchSync>;

    /// Open a PR for `branch` or update the existing one, leaving it in the
    /// requested draft state.
    fn create_or_update_pr(
        &mut self,
        issue: u64,
        branch: &str,
        title: &str,
        draft: bool,
    ) -> Result<PrUpdate>;

    fn set_pr_draft(&mut self, issue: u64, draft: bool) -> Result<()>;

    fn request_review(&mut self, issue: u64, reviewer: &str) -> Result<()>;

    fn set_state(&mut self, issue: u64, state: ItemState) -> Result<()>;

    /// Replace the structured body of an item.
    fn persist_body(&mut self, issue: u64, body: &BodyStructure) -> Result<()>;
}
