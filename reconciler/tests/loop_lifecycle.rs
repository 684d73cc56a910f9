//! Loop-level tests driving `run_pass` over a file-backed item store.
//!
//! Each test runs several passes the way a webhook-driven deployment would,
//! checking the tracked item, the recorded expectations and the diff reports
//! between passes.

use reconciler::core::action::{Action, ActionKind};
use reconciler::core::signal::Signal;
use reconciler::core::snapshot::Repo;
use reconciler::core::types::{CiResult, Status, Target};
use reconciler::exec::StopReason;
use reconciler::io::StatePaths;
use reconciler::io::config::ReconcilerConfig;
use reconciler::io::expectations::load_expectations;
use reconciler::io::reports::list_reports;
use reconciler::io::store::{ItemRecord, ItemStore};
use reconciler::io::system::IssueSystem;
use reconciler::pass::{PassOptions, PassOutcome, run_pass};
use reconciler::test_support::{BOT, ScriptedAgent, item, open_pr, working_item};
use serde_json::json;

struct Harness {
    _temp: tempfile::TempDir,
    paths: StatePaths,
    store: ItemStore,
    config: ReconcilerConfig,
}

impl Harness {
    fn new(records: Vec<ItemRecord>) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        let mut store = ItemStore::open(&paths, Repo::default(), BOT).expect("open store");
        for record in records {
            store.insert(record).expect("insert");
        }
        Self {
            _temp: temp,
            paths,
            store,
            config: ReconcilerConfig::default(),
        }
    }

    fn pass(&mut self, agent: &ScriptedAgent, item: u64, signal: Signal) -> PassOutcome {
        self.pass_with(agent, item, signal, PassOptions::default())
    }

    fn pass_with(
        &mut self,
        agent: &ScriptedAgent,
        item: u64,
        signal: Signal,
        options: PassOptions,
    ) -> PassOutcome {
        run_pass(
            &self.paths,
            &mut self.store,
            agent,
            &self.config,
            item,
            signal,
            &options,
        )
        .expect("pass")
    }

    /// Reload from disk so assertions see what was persisted.
    fn reload(&self) -> ItemStore {
        ItemStore::open(&self.paths, Repo::default(), BOT).expect("reopen store")
    }
}

fn ci(result: CiResult) -> Signal {
    Signal::CiCompleted {
        result,
        run_url: Some("https://ci.example/run/1".to_string()),
    }
}

fn fix_agent() -> ScriptedAgent {
    ScriptedAgent::default().respond(
        "fix-ci",
        json!({"todos_completed": 0, "notes": "fixed the flaky test", "summary": "fixed"}),
    )
}

/// Triage → assign → iterate, with every pass verifying the one before.
#[test]
fn triage_then_iterate_verifies_each_pass() {
    let mut fresh = item(5);
    fresh.body.has_description = true;
    fresh.body.todos.total = 2;
    let mut h = Harness::new(vec![ItemRecord::new(fresh)]);
    let agent = ScriptedAgent::default()
        .respond("triage", json!({"labels": ["bug"], "summary": "a bug"}))
        .respond(
            "iterate",
            json!({"todos_completed": 2, "notes": null, "summary": "all done"}),
        );

    let triaged = h.pass(&agent, 5, Signal::Triage);
    assert_eq!(triaged.target, Target::Triaging);
    assert!(triaged.run.success());
    let after_triage = h.reload().item(5).expect("item");
    assert!(after_triage.has_label("bug"));
    assert!(after_triage.has_label("triaged"));
    assert_eq!(after_triage.status, Some(Status::Ready));

    h.store.assign(5, BOT).expect("assign");

    let iterated = h.pass(&agent, 5, Signal::Assigned);
    assert!(iterated.verification.as_ref().is_some_and(|v| v.pass));
    assert_eq!(iterated.target, Target::Iterating);
    assert!(iterated.run.success(), "{:?}", iterated.run);
    let after_iterate = h.reload().item(5).expect("item");
    assert_eq!(after_iterate.iteration, 1);
    assert_eq!(after_iterate.body.todos.completed, 2);
    assert!(after_iterate.pr.as_ref().is_some_and(|pr| pr.is_draft));
    assert_eq!(agent.invocations(), vec!["triage", "iterate"]);

    let next = h.pass(&agent, 5, ci(CiResult::Success));
    assert!(next.verification.as_ref().is_some_and(|v| v.pass));
    assert!(list_reports(&h.paths.reports_dir, 5).expect("reports").is_empty());
}

#[test]
fn ci_failure_below_budget_runs_a_fix_iteration() {
    let mut work = working_item(7);
    work.failures = 2;
    work.pr = Some(open_pr(70, true));
    let mut h = Harness::new(vec![ItemRecord::new(work)]);
    let agent = fix_agent();

    let outcome = h.pass(&agent, 7, ci(CiResult::Failure));
    assert_eq!(outcome.target, Target::IteratingFix);
    assert_eq!(outcome.rule, "ci.failed");
    assert!(outcome.run.success(), "{:?}", outcome.run);
    assert!(outcome.outcomes >= 2, "prepare-branch bifurcates");

    let stored = h.reload().item(7).expect("item");
    assert_eq!(stored.failures, 3);
    assert_eq!(stored.iteration, 1);
    assert!(stored.body.has_agent_notes);
    assert!(
        stored
            .body
            .history
            .iter()
            .any(|entry| entry.action.contains("Updated PR #70"))
    );
    assert!(
        load_expectations(&h.paths.expectations_dir, 7)
            .expect("load")
            .is_some()
    );

    let next = h.pass(&agent, 7, Signal::Edited);
    assert!(next.verification.as_ref().is_some_and(|v| v.pass));
}

/// One failure short of the budget: the fix iteration charges the last
/// retry and the next observation still verifies.
#[test]
fn ci_failure_one_below_budget_verifies_on_the_next_pass() {
    let mut work = working_item(7);
    work.failures = 4;
    work.pr = Some(open_pr(70, true));
    let mut h = Harness::new(vec![ItemRecord::new(work)]);
    let agent = fix_agent();

    let outcome = h.pass(&agent, 7, ci(CiResult::Failure));
    assert_eq!(outcome.target, Target::IteratingFix);
    assert_eq!(outcome.actions.first(), Some(&Action::RecordFailure { issue: 7 }));
    assert!(outcome.run.success(), "{:?}", outcome.run);
    assert!(outcome.expectations_recorded);

    let stored = h.reload().item(7).expect("item");
    assert_eq!(stored.failures, 5);
    assert_eq!(stored.status, Some(Status::InProgress));

    let next = h.pass(&agent, 7, Signal::Edited);
    let verification = next.verification.expect("verified");
    assert!(verification.pass, "{:?}", verification.best_match);
    assert!(list_reports(&h.paths.reports_dir, 7).expect("reports").is_empty());
}

#[test]
fn ci_failure_at_budget_blocks_the_item() {
    let mut work = working_item(7);
    work.failures = 5;
    work.pr = Some(open_pr(70, true));
    let mut h = Harness::new(vec![ItemRecord::new(work)]);
    let agent = fix_agent();

    let outcome = h.pass(&agent, 7, ci(CiResult::Failure));
    assert_eq!(outcome.target, Target::Blocked);
    assert_eq!(outcome.rule, "circuit-breaker");
    assert_eq!(
        outcome.run.stop_reason,
        Some(StopReason::Terminal(ActionKind::Block))
    );
    assert!(!outcome.run.stopped_early);
    assert!(agent.invocations().is_empty());

    let store = h.reload();
    let record = store.record(7).expect("record");
    assert_eq!(record.item.status, Some(Status::Blocked));
    assert!(!record.item.is_assigned_to(BOT));
    assert!(
        record
            .comments
            .iter()
            .any(|c| c.body.starts_with("Automation blocked:"))
    );
}

#[test]
fn out_of_band_edit_is_reported_and_counted() {
    let mut h = Harness::new(vec![ItemRecord::new(working_item(7))]);
    let agent = ScriptedAgent::default().respond(
        "iterate",
        json!({"todos_completed": 0, "notes": null, "summary": "wip"}),
    );
    h.pass(&agent, 7, Signal::Assigned);

    // a human takes the item over between passes
    h.store.unassign(7, BOT).expect("unassign");

    let outcome = h.pass(&agent, 7, Signal::Edited);
    assert!(outcome.mismatched());
    assert_eq!(outcome.target, Target::VerificationFailed);
    let reports = list_reports(&h.paths.reports_dir, 7).expect("reports");
    assert_eq!(reports.len(), 1);
    assert_eq!(outcome.report.as_ref(), reports.first());

    let stored = h.reload().item(7).expect("item");
    assert_eq!(stored.failures, 1);
    assert!(!stored.is_assigned_to(BOT));
}

#[test]
fn dry_run_is_idempotent() {
    let mut work = working_item(7);
    work.pr = Some(open_pr(70, true));
    let mut h = Harness::new(vec![ItemRecord::new(work)]);
    let before: Vec<ItemRecord> = h.reload().records().cloned().collect();
    let agent = fix_agent();
    let options = PassOptions { dry_run: true };

    let first = h.pass_with(&agent, 7, ci(CiResult::Failure), options);
    let second = h.pass_with(&agent, 7, ci(CiResult::Failure), options);
    assert_eq!(first, second);
    assert!(first.run.success());
    assert!(agent.invocations().is_empty());

    let after: Vec<ItemRecord> = h.reload().records().cloned().collect();
    assert_eq!(after, before);
    assert!(
        load_expectations(&h.paths.expectations_dir, 7)
            .expect("load")
            .is_none()
    );
}
