//! File-backed item store under `.reconciler/items/<n>.json`.
//!
//! [`ItemStore`] keeps every record in memory and, when opened on a
//! directory, rewrites the touched record atomically after each mutation.
//! The same type backs the in-memory system used by tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::snapshot::{BodyStructure, Phase, PullRequest, Repo, Snapshot, WorkItem};
use crate::core::types::{ItemState, PrState, Status};
use crate::io::system::{BranchSync, IssueSystem, PrUpdate};
use crate::io::{StatePaths, write_json};

/// Comment stored on an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// Persisted item: the observable work item plus store-only bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(flatten)]
    pub item: WorkItem,
    /// Parent item number when this record is a phase.
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub phase: Option<u32>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub requested_reviewers: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Default branch moved since the item branch was last rebased.
    #[serde(default)]
    pub behind_default_branch: bool,
}

impl ItemRecord {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            parent: None,
            phase: None,
            branch: None,
            pr_title: None,
            requested_reviewers: Vec::new(),
            comments: Vec::new(),
            behind_default_branch: false,
        }
    }

    /// Record for phase `phase` of `parent`.
    pub fn phase_of(parent: u64, phase: u32, item: WorkItem) -> Self {
        Self {
            parent: Some(parent),
            phase: Some(phase),
            ..Self::new(item)
        }
    }
}

/// Item records keyed by number, optionally mirrored to a directory.
#[derive(Debug, Clone)]
pub struct ItemStore {
    dir: Option<PathBuf>,
    repo: Repo,
    actor: String,
    records: BTreeMap<u64, ItemRecord>,
}

impl ItemStore {
    /// Store that never touches the filesystem.
    pub fn in_memory(repo: Repo, actor: &str, records: impl IntoIterator<Item = ItemRecord>) -> Self {
        Self {
            dir: None,
            repo,
            actor: actor.to_string(),
            records: records
                .into_iter()
                .map(|record| (record.item.number, record))
                .collect(),
        }
    }

    /// Load every `<n>.json` under the items directory (missing dir = empty).
    #[instrument(skip_all, fields(dir = %paths.items_dir.display()))]
    pub fn open(paths: &StatePaths, repo: Repo, actor: &str) -> Result<Self> {
        let dir = paths.items_dir.clone();
        let mut records = BTreeMap::new();
        if dir.exists() {
            let entries =
                fs::read_dir(&dir).with_context(|| format!("read items dir {}", dir.display()))?;
            for entry in entries {
                let path = entry
                    .with_context(|| format!("read items dir {}", dir.display()))?
                    .path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    let record = load_record(&path)?;
                    records.insert(record.item.number, record);
                }
            }
        }
        debug!(items = records.len(), "item store loaded");
        Ok(Self {
            dir: Some(dir),
            repo,
            actor: actor.to_string(),
            records,
        })
    }

    pub fn record(&self, issue: u64) -> Result<&ItemRecord> {
        self.records
            .get(&issue)
            .ok_or_else(|| anyhow!("unknown item #{issue}"))
    }

    pub fn records(&self) -> impl Iterator<Item = &ItemRecord> {
        self.records.values()
    }

    /// Add or replace a record and persist it.
    pub fn insert(&mut self, record: ItemRecord) -> Result<()> {
        let issue = record.item.number;
        self.records.insert(issue, record);
        self.save(issue)
    }

    fn update<T>(&mut self, issue: u64, apply: impl FnOnce(&mut ItemRecord) -> Result<T>) -> Result<T> {
        let record = self
            .records
            .get_mut(&issue)
            .ok_or_else(|| anyhow!("unknown item #{issue}"))?;
        let out = apply(record)?;
        self.save(issue)?;
        Ok(out)
    }

    fn save(&self, issue: u64) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let record = self.record(issue)?;
        write_json(&dir.join(format!("{issue}.json")), record)
            .with_context(|| format!("save item #{issue}"))
    }

    fn next_pr_number(&self) -> u64 {
        self.records
            .values()
            .flat_map(|record| {
                [
                    Some(record.item.number),
                    record.item.pr.as_ref().map(|pr| pr.number),
                ]
            })
            .flatten()
            .max()
            .unwrap_or(0)
            + 1
    }
}

fn load_record(path: &Path) -> Result<ItemRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read item {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse item {}", path.display()))
}

fn require_pr(record: &mut ItemRecord) -> Result<&mut PullRequest> {
    let issue = record.item.number;
    record
        .item
        .pr
        .as_mut()
        .ok_or_else(|| anyhow!("item #{issue} has no pull request"))
}

impl IssueSystem for ItemStore {
    fn fetch(&self, number: u64) -> Result<Snapshot> {
        let item = self.record(number)?.item.clone();
        let mut phases = Vec::new();
        for record in self.records.values().filter(|r| r.parent == Some(number)) {
            let phase = record.phase.ok_or_else(|| {
                anyhow!(
                    "item #{} has parent #{number} but no phase number",
                    record.item.number
                )
            })?;
            phases.push(Phase {
                phase,
                item: record.item.clone(),
            });
        }
        phases.sort_by_key(|phase| phase.phase);
        Ok(Snapshot {
            repo: self.repo.clone(),
            item,
            phases,
        })
    }

    fn item(&self, issue: u64) -> Result<WorkItem> {
        Ok(self.record(issue)?.item.clone())
    }

    fn set_status(&mut self, issue: u64, status: Status) -> Result<()> {
        self.update(issue, |r| {
            r.item.status = Some(status);
            Ok(())
        })
    }

    fn increment_iteration(&mut self, issue: u64) -> Result<u32> {
        self.update(issue, |r| {
            r.item.iteration = r.item.iteration.saturating_add(1);
            Ok(r.item.iteration)
        })
    }

    fn record_failure(&mut self, issue: u64) -> Result<u32> {
        self.update(issue, |r| {
            r.item.failures = r.item.failures.saturating_add(1);
            Ok(r.item.failures)
        })
    }

    fn clear_failures(&mut self, issue: u64) -> Result<()> {
        self.update(issue, |r| {
            r.item.failures = 0;
            Ok(())
        })
    }

    fn add_labels(&mut self, issue: u64, labels: &[String]) -> Result<()> {
        self.update(issue, |r| {
            for label in labels {
                if !r.item.has_label(label) {
                    r.item.labels.push(label.clone());
                }
            }
            Ok(())
        })
    }

    fn remove_labels(&mut self, issue: u64, labels: &[String]) -> Result<()> {
        self.update(issue, |r| {
            r.item.labels.retain(|l| !labels.contains(l));
            Ok(())
        })
    }

    fn assign(&mut self, issue: u64, login: &str) -> Result<()> {
        self.update(issue, |r| {
            if !r.item.is_assigned_to(login) {
                r.item.assignees.push(login.to_string());
            }
            Ok(())
        })
    }

    fn unassign(&mut self, issue: u64, login: &str) -> Result<()> {
        self.update(issue, |r| {
            r.item.assignees.retain(|a| a != login);
            Ok(())
        })
    }

    fn create_comment(&mut self, issue: u64, body: &str) -> Result<u64> {
        let id = self
            .records
            .values()
            .map(|r| r.comments.len() as u64)
            .sum::<u64>()
            + 1;
        let author = self.actor.clone();
        self.update(issue, |r| {
            r.comments.push(Comment {
                id,
                author,
                body: body.to_string(),
            });
            Ok(id)
        })
    }

    fn create_branch(&mut self, issue: u64, branch: &str) -> Result<()> {
        self.update(issue, |r| {
            r.item.has_branch = true;
            r.branch = Some(branch.to_string());
            Ok(())
        })
    }

    fn prepare_branch(&mut self, issue: u64, branch: &str) -> Result<BranchSync> {
        self.update(issue, |r| {
            if !r.item.has_branch {
                bail!("branch {branch} does not exist for #{issue}");
            }
            if r.behind_default_branch {
                r.behind_default_branch = false;
                return Ok(BranchSync::Rebased);
            }
            Ok(BranchSync::UpToDate)
        })
    }

    fn create_or_update_pr(
        &mut self,
        issue: u64,
        branch: &str,
        title: &str,
        draft: bool,
    ) -> Result<PrUpdate> {
        let next_number = self.next_pr_number();
        self.update(issue, |r| {
            if !r.item.has_branch {
                bail!("cannot open a pull request for #{issue}: branch {branch} is missing");
            }
            r.pr_title = Some(title.to_string());
            match r.item.pr.as_mut() {
                Some(pr) => {
                    pr.is_draft = draft;
                    pr.state = PrState::Open;
                    Ok(PrUpdate {
                        number: pr.number,
                        created: false,
                    })
                }
                None => {
                    r.item.pr = Some(PullRequest {
                        number: next_number,
                        is_draft: draft,
                        state: PrState::Open,
                        ci: None,
                    });
                    Ok(PrUpdate {
                        number: next_number,
                        created: true,
                    })
                }
            }
        })
    }

    fn set_pr_draft(&mut self, issue: u64, draft: bool) -> Result<()> {
        self.update(issue, |r| {
            require_pr(r)?.is_draft = draft;
            Ok(())
        })
    }

    fn request_review(&mut self, issue: u64, reviewer: &str) -> Result<()> {
        self.update(issue, |r| {
            require_pr(r)?;
            if !r.requested_reviewers.iter().any(|x| x == reviewer) {
                r.requested_reviewers.push(reviewer.to_string());
            }
            Ok(())
        })
    }

    fn set_state(&mut self, issue: u64, state: ItemState) -> Result<()> {
        self.update(issue, |r| {
            r.item.state = state;
            Ok(())
        })
    }

    fn persist_body(&mut self, issue: u64, body: &BodyStructure) -> Result<()> {
        self.update(issue, |r| {
            r.item.body = body.clone();
            Ok(())
        })
    }
}
