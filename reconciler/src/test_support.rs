//! Test-only builders and in-memory collaborators.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, bail};
use serde_json::Value;

use crate::core::action::ActionKind;
use crate::core::snapshot::{
    BodyStructure, Phase, PullRequest, Repo, Snapshot, WorkItem,
};
use crate::core::types::{ItemState, PrState, Status};
use crate::io::agent::{Agent, AgentRequest, AgentResponse};
use crate::io::store::{ItemRecord, ItemStore};
use crate::io::system::{BranchSync, IssueSystem, PrUpdate};

/// Login the automation acts as in tests.
pub const BOT: &str = "reconciler-bot";

/// Open, unassigned item with no status and an empty body.
pub fn item(number: u64) -> WorkItem {
    WorkItem {
        number,
        title: format!("Item {number}"),
        state: ItemState::Open,
        status: None,
        iteration: 0,
        failures: 0,
        labels: Vec::new(),
        assignees: Vec::new(),
        has_branch: false,
        pr: None,
        body: BodyStructure::default(),
    }
}

/// Triaged item assigned to [`BOT`] with a branch, in progress.
pub fn working_item(number: u64) -> WorkItem {
    let mut work = item(number);
    work.status = Some(Status::InProgress);
    work.labels = vec!["triaged".to_string()];
    work.assignees = vec![BOT.to_string()];
    work.has_branch = true;
    work.body.has_description = true;
    work
}

pub fn phase(phase: u32, number: u64, status: Option<Status>) -> Phase {
    let mut work = item(number);
    work.status = status;
    Phase { phase, item: work }
}

pub fn open_pr(number: u64, is_draft: bool) -> PullRequest {
    PullRequest {
        number,
        is_draft,
        state: PrState::Open,
        ci: None,
    }
}

pub fn snapshot(item: WorkItem) -> Snapshot {
    snapshot_with_phases(item, Vec::new())
}

pub fn snapshot_with_phases(item: WorkItem, phases: Vec<Phase>) -> Snapshot {
    Snapshot {
        repo: Repo {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        },
        item,
        phases,
    }
}

/// In-memory [`IssueSystem`] with per-action failure injection and a call log.
#[derive(Debug, Clone)]
pub struct MemorySystem {
    store: ItemStore,
    failing: BTreeSet<ActionKind>,
    calls: Vec<String>,
}

impl MemorySystem {
    pub fn with_records(records: Vec<ItemRecord>) -> Self {
        let repo = Repo {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        };
        Self {
            store: ItemStore::in_memory(repo, BOT, records),
            failing: BTreeSet::new(),
            calls: Vec::new(),
        }
    }

    /// Current item state; panics on unknown items.
    pub fn get(&self, issue: u64) -> WorkItem {
        self.store
            .record(issue)
            .map(|record| record.item.clone())
            .unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn record(&self, issue: u64) -> ItemRecord {
        self.store
            .record(issue)
            .cloned()
            .unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn records(&self) -> Vec<ItemRecord> {
        self.store.records().cloned().collect()
    }

    /// Make every mutation belonging to `kind` fail.
    pub fn fail_on(&mut self, kind: ActionKind) {
        self.failing.insert(kind);
    }

    pub fn set_behind_default_branch(&mut self, issue: u64) {
        let mut record = self.record(issue);
        record.behind_default_branch = true;
        self.store
            .insert(record)
            .unwrap_or_else(|err| panic!("{err}"));
    }

    /// Mutations attempted so far, as `"<action>#<issue>"`.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    fn enter(&mut self, kind: ActionKind, issue: u64) -> Result<()> {
        self.calls.push(format!("{}#{issue}", kind.as_str()));
        if self.failing.contains(&kind) {
            bail!("injected {} failure on #{issue}", kind.as_str());
        }
        Ok(())
    }
}

impl IssueSystem for MemorySystem {
    fn fetch(&self, number: u64) -> Result<Snapshot> {
        self.store.fetch(number)
    }

    fn item(&self, issue: u64) -> Result<WorkItem> {
        self.store.item(issue)
    }

    fn set_status(&mut self, issue: u64, status: Status) -> Result<()> {
        self.enter(ActionKind::SetStatus, issue)?;
        self.store.set_status(issue, status)
    }

    fn increment_iteration(&mut self, issue: u64) -> Result<u32> {
        self.enter(ActionKind::IncrementIteration, issue)?;
        self.store.increment_iteration(issue)
    }

    fn record_failure(&mut self, issue: u64) -> Result<u32> {
        self.enter(ActionKind::RecordFailure, issue)?;
        self.store.record_failure(issue)
    }

    fn clear_failures(&mut self, issue: u64) -> Result<()> {
        self.enter(ActionKind::ClearFailures, issue)?;
        self.store.clear_failures(issue)
    }

    fn add_labels(&mut self, issue: u64, labels: &[String]) -> Result<()> {
        self.enter(ActionKind::AddLabels, issue)?;
        self.store.add_labels(issue, labels)
    }

    fn remove_labels(&mut self, issue: u64, labels: &[String]) -> Result<()> {
        self.enter(ActionKind::RemoveLabels, issue)?;
        self.store.remove_labels(issue, labels)
    }

    fn assign(&mut self, issue: u64, login: &str) -> Result<()> {
        self.enter(ActionKind::Assign, issue)?;
        self.store.assign(issue, login)
    }

    fn unassign(&mut self, issue: u64, login: &str) -> Result<()> {
        self.enter(ActionKind::Unassign, issue)?;
        self.store.unassign(issue, login)
    }

    fn create_comment(&mut self, issue: u64, body: &str) -> Result<u64> {
        self.enter(ActionKind::CreateComment, issue)?;
        self.store.create_comment(issue, body)
    }

    fn create_branch(&mut self, issue: u64, branch: &str) -> Result<()> {
        self.enter(ActionKind::CreateBranch, issue)?;
        self.store.create_branch(issue, branch)
    }

    fn prepare_branch(&mut self, issue: u64, branch: &str) -> Result<BranchSync> {
        self.enter(ActionKind::PrepareBranch, issue)?;
        self.store.prepare_branch(issue, branch)
    }

    fn create_or_update_pr(
        &mut self,
        issue: u64,
        branch: &str,
        title: &str,
        draft: bool,
    ) -> Result<PrUpdate> {
        self.enter(ActionKind::CreateOrUpdatePr, issue)?;
        self.store.create_or_update_pr(issue, branch, title, draft)
    }

    fn set_pr_draft(&mut self, issue: u64, draft: bool) -> Result<()> {
        let kind = if draft {
            ActionKind::ConvertPrToDraft
        } else {
            ActionKind::MarkPrReady
        };
        self.enter(kind, issue)?;
        self.store.set_pr_draft(issue, draft)
    }

    fn request_review(&mut self, issue: u64, reviewer: &str) -> Result<()> {
        self.enter(ActionKind::RequestReview, issue)?;
        self.store.request_review(issue, reviewer)
    }

    fn set_state(&mut self, issue: u64, state: ItemState) -> Result<()> {
        let kind = match state {
            ItemState::Closed => ActionKind::CloseItem,
            ItemState::Open => ActionKind::ReopenItem,
        };
        self.enter(kind, issue)?;
        self.store.set_state(issue, state)
    }

    fn persist_body(&mut self, issue: u64, body: &BodyStructure) -> Result<()> {
        self.enter(ActionKind::AppendHistory, issue)?;
        self.store.persist_body(issue, body)
    }
}

/// Agent returning canned responses keyed by task name.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    responses: HashMap<String, AgentResponse>,
    invocations: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    /// Succeed on `task` with `payload`; the summary is taken from the payload.
    pub fn respond(mut self, task: &str, payload: Value) -> Self {
        let summary = payload
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.responses.insert(
            task.to_string(),
            AgentResponse {
                success: true,
                payload: Some(payload),
                summary,
            },
        );
        self
    }

    pub fn fail(mut self, task: &str, summary: &str) -> Self {
        self.responses
            .insert(task.to_string(), AgentResponse::failed(summary));
        self
    }

    /// Task names invoked so far, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let task = request.task.name();
        self.invocations.borrow_mut().push(task.to_string());
        Ok(self
            .responses
            .get(task)
            .cloned()
            .unwrap_or_else(|| AgentResponse::failed(format!("no scripted response for {task}"))))
    }
}
