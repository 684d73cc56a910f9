//! Orchestration for a single reconcile / predict / verify pass.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::action::{Action, describe_actions};
use crate::core::machine::{Transition, TransitionEngine};
use crate::core::predict::{OutcomeSet, PredictMeta, predict};
use crate::core::signal::Signal;
use crate::core::tree::PredictableTree;
use crate::core::types::Target;
use crate::core::verify::{DiffReport, Verification, compare};
use crate::exec::{ExecutionContext, RunOptions, RunResult, StopReason, execute};
use crate::io::StatePaths;
use crate::io::agent::Agent;
use crate::io::config::ReconcilerConfig;
use crate::io::expectations::{clear_expectations, load_expectations, write_expectations};
use crate::io::reports::write_report;
use crate::io::system::IssueSystem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    /// Derive and predict without touching the item system or `.reconciler/`.
    pub dry_run: bool,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassOutcome {
    pub item: u64,
    /// Signal the transition was derived from (after any verification override).
    pub signal: Signal,
    pub target: Target,
    pub rule: &'static str,
    pub actions: Vec<Action>,
    /// Verification of the previous pass's expectations, if any were recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
    /// Number of acceptable outcomes predicted for this pass.
    pub outcomes: usize,
    pub expectations_recorded: bool,
    pub run: RunResult,
}

impl PassOutcome {
    pub fn mismatched(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| !v.pass)
    }
}

/// Derive the transition for `signal` on the current state and predict its
/// outcomes. Pure apart from the snapshot fetch.
pub fn plan(
    system: &dyn IssueSystem,
    config: &ReconcilerConfig,
    item: u64,
    signal: &Signal,
) -> Result<(Transition, OutcomeSet)> {
    let snapshot = system
        .fetch(item)
        .with_context(|| format!("fetch snapshot of #{item}"))?;
    let transition = TransitionEngine::new(config.engine())
        .derive(&snapshot, signal)
        .with_context(|| format!("derive transition for #{item}"))?;
    let outcomes = predict(
        &transition.actions,
        &PredictableTree::from_snapshot(&snapshot),
        &snapshot,
        &PredictMeta {
            target: transition.target,
            rule: transition.rule.to_string(),
            signal: signal.tag().to_string(),
        },
    );
    Ok((transition, outcomes))
}

/// Verify the recorded expectations of `item` against its current state.
///
/// Returns `None` when nothing was recorded or the record is unusable
/// (unreadable, foreign vocabulary, empty).
pub fn verify_recorded(
    paths: &StatePaths,
    system: &dyn IssueSystem,
    item: u64,
) -> Result<Option<(OutcomeSet, Verification)>> {
    let set = match load_expectations(&paths.expectations_dir, item) {
        Ok(Some(set)) => set,
        Ok(None) => return Ok(None),
        Err(err) => {
            warn!(item, err = %format!("{err:#}"), "discarding unreadable expectations");
            return Ok(None);
        }
    };
    let snapshot = system
        .fetch(item)
        .with_context(|| format!("fetch snapshot of #{item}"))?;
    match compare(&set, &PredictableTree::from_snapshot(&snapshot)) {
        Ok(verification) => Ok(Some((set, verification))),
        Err(err) => {
            warn!(item, err = %err, "discarding unusable expectations");
            Ok(None)
        }
    }
}

/// Run one pass for `item` triggered by `signal`.
///
/// 1. Verify the previous pass's expectations; a mismatch writes a diff
///    report and replaces `signal` with `verification-failed`.
/// 2. Derive the transition and predict its outcomes.
/// 3. Record the outcomes, then execute the actions.
///
/// An execution error that stops the run drops the recorded outcomes and
/// counts one failure against the item.
#[instrument(skip_all, fields(item, signal = signal.tag(), dry_run = options.dry_run))]
pub fn run_pass(
    paths: &StatePaths,
    system: &mut dyn IssueSystem,
    agent: &dyn Agent,
    config: &ReconcilerConfig,
    item: u64,
    signal: Signal,
    options: &PassOptions,
) -> Result<PassOutcome> {
    let mut signal = signal;
    let mut report = None;
    let verification = match verify_recorded(paths, system, item)? {
        Some((set, verification)) => {
            if !verification.pass {
                let diff = DiffReport::new(&set, &verification);
                warn!(item, summary = %diff.summary(), "previous pass did not verify");
                if !options.dry_run {
                    report = Some(write_report(&paths.reports_dir, &diff)?);
                }
                signal = Signal::VerificationFailed {
                    summary: diff.summary(),
                };
            }
            if !options.dry_run {
                clear_expectations(&paths.expectations_dir, item)?;
            }
            Some(verification)
        }
        None => {
            if !options.dry_run {
                clear_expectations(&paths.expectations_dir, item)?;
            }
            None
        }
    };

    let (transition, outcomes) = plan(system, config, item, &signal)?;
    info!(
        to = %transition.target,
        rule = transition.rule,
        actions = %describe_actions(&transition.actions),
        outcomes = outcomes.outcomes.len(),
        "transition derived"
    );

    let record = !options.dry_run && !transition.actions.is_empty();
    if record {
        write_expectations(&paths.expectations_dir, &outcomes)?;
    }

    let snapshot = system
        .fetch(item)
        .with_context(|| format!("fetch snapshot of #{item}"))?;
    let run = {
        let mut ctx = ExecutionContext {
            system: &mut *system,
            agent,
            snapshot: &snapshot,
        };
        execute(
            &transition.actions,
            &mut ctx,
            &RunOptions {
                dry_run: options.dry_run,
            },
        )?
    };

    let mut expectations_recorded = record;
    if let Some(StopReason::Error(kind)) = run.stop_reason {
        clear_expectations(&paths.expectations_dir, item)?;
        expectations_recorded = false;
        if failure_recorded(&run, item) {
            warn!(item, action = kind.as_str(), "execution failed after the failure was counted");
        } else {
            warn!(item, action = kind.as_str(), "execution failed, counting a failure");
            system
                .record_failure(item)
                .with_context(|| format!("record execution failure on #{item}"))?;
        }
    }

    Ok(PassOutcome {
        item,
        signal,
        target: transition.target,
        rule: transition.rule,
        actions: transition.actions,
        verification,
        report,
        outcomes: outcomes.outcomes.len(),
        expectations_recorded,
        run,
    })
}

/// The run already charged `item` one failure through `record-failure`.
fn failure_recorded(run: &RunResult, item: u64) -> bool {
    run.results.iter().any(|r| {
        r.success && !r.skipped && matches!(r.action, Action::RecordFailure { issue } if issue == item)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CiResult, Status};
    use crate::io::store::ItemRecord;
    use crate::test_support::{MemorySystem, ScriptedAgent, open_pr, working_item};
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, StatePaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        (temp, paths)
    }

    fn iterate_agent() -> ScriptedAgent {
        ScriptedAgent::default().respond(
            "iterate",
            json!({"todos_completed": 1, "notes": null, "summary": "progress"}),
        )
    }

    #[test]
    fn pass_records_expectations_and_next_pass_verifies() {
        let (_temp, paths) = setup();
        let mut work = working_item(7);
        work.body.todos.total = 3;
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(work)]);
        let agent = iterate_agent();
        let config = ReconcilerConfig::default();

        let first = run_pass(
            &paths,
            &mut system,
            &agent,
            &config,
            7,
            Signal::Assigned,
            &PassOptions::default(),
        )
        .expect("first pass");
        assert_eq!(first.target, Target::Iterating);
        assert!(first.run.success(), "{:?}", first.run);
        assert!(first.expectations_recorded);
        assert!(paths.expectations_dir.join("7.json").exists());

        let second = run_pass(
            &paths,
            &mut system,
            &agent,
            &config,
            7,
            Signal::Edited,
            &PassOptions::default(),
        )
        .expect("second pass");
        let verification = second.verification.expect("verified");
        assert!(verification.pass, "{:?}", verification.best_match);
        assert!(second.report.is_none());
    }

    #[test]
    fn out_of_band_change_becomes_verification_failed() {
        let (_temp, paths) = setup();
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = iterate_agent();
        let config = ReconcilerConfig::default();
        run_pass(
            &paths,
            &mut system,
            &agent,
            &config,
            7,
            Signal::Assigned,
            &PassOptions::default(),
        )
        .expect("first pass");

        // someone moves the item back to Ready between passes
        system.set_status(7, Status::Ready).expect("status");

        let second = run_pass(
            &paths,
            &mut system,
            &agent,
            &config,
            7,
            Signal::Edited,
            &PassOptions::default(),
        )
        .expect("second pass");
        assert!(second.mismatched());
        assert_eq!(second.signal.tag(), "verification-failed");
        assert_eq!(second.target, Target::VerificationFailed);
        let report = second.report.expect("report written");
        assert!(report.exists());
    }

    #[test]
    fn execution_error_drops_expectations_and_counts_a_failure() {
        let (_temp, paths) = setup();
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = ScriptedAgent::default().fail("iterate", "agent crashed");
        let config = ReconcilerConfig::default();
        let outcome = run_pass(
            &paths,
            &mut system,
            &agent,
            &config,
            7,
            Signal::Assigned,
            &PassOptions::default(),
        )
        .expect("pass");
        assert!(matches!(outcome.run.stop_reason, Some(StopReason::Error(_))));
        assert!(!outcome.expectations_recorded);
        assert!(!paths.expectations_dir.join("7.json").exists());
        assert_eq!(system.get(7).failures, 1);
    }

    #[test]
    fn failed_fix_iteration_counts_the_ci_failure_once() {
        let (_temp, paths) = setup();
        let mut work = working_item(7);
        work.failures = 3;
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(work)]);
        let agent = ScriptedAgent::default().fail("fix-ci", "agent crashed");
        let outcome = run_pass(
            &paths,
            &mut system,
            &agent,
            &ReconcilerConfig::default(),
            7,
            Signal::CiCompleted {
                result: CiResult::Failure,
                run_url: None,
            },
            &PassOptions::default(),
        )
        .expect("pass");
        assert_eq!(outcome.target, Target::IteratingFix);
        assert!(matches!(outcome.run.stop_reason, Some(StopReason::Error(_))));
        assert!(!outcome.expectations_recorded);
        assert_eq!(system.get(7).failures, 4);
    }

    #[test]
    fn unreadable_expectations_are_discarded() {
        let (_temp, paths) = setup();
        std::fs::create_dir_all(&paths.expectations_dir).expect("mkdir");
        std::fs::write(paths.expectations_dir.join("7.json"), "{not json").expect("write");
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let outcome = run_pass(
            &paths,
            &mut system,
            &iterate_agent(),
            &ReconcilerConfig::default(),
            7,
            Signal::Assigned,
            &PassOptions::default(),
        )
        .expect("pass goes ahead");
        assert!(outcome.verification.is_none());
        assert_eq!(outcome.target, Target::Iterating);
        assert!(outcome.run.success(), "{:?}", outcome.run);
        let recorded = load_expectations(&paths.expectations_dir, 7)
            .expect("fresh expectations parse")
            .expect("recorded");
        assert_eq!(recorded.item, 7);
    }

    #[test]
    fn dry_run_leaves_no_trace() {
        let (_temp, paths) = setup();
        let mut work = working_item(7);
        work.pr = Some(open_pr(70, true));
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(work)]);
        let before = system.records();
        let outcome = run_pass(
            &paths,
            &mut system,
            &iterate_agent(),
            &ReconcilerConfig::default(),
            7,
            Signal::CiCompleted {
                result: CiResult::Failure,
                run_url: None,
            },
            &PassOptions { dry_run: true },
        )
        .expect("dry run");
        assert_eq!(outcome.target, Target::IteratingFix);
        assert!(outcome.run.results.iter().all(|r| r.success && r.skipped));
        assert_eq!(system.records(), before);
        assert!(!paths.expectations_dir.exists());
    }
}
