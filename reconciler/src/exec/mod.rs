//! Action execution runner.
//!
//! Applies a derived action list strictly in order through a static
//! `ActionKind -> executor` table. Each executor receives the previous
//! executor's structured output and returns its own; the chain lives only for
//! the duration of one run. After every action the stop policy is checked.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::action::{Action, ActionKind};
use crate::core::snapshot::Snapshot;
use crate::io::agent::Agent;
use crate::io::system::IssueSystem;

mod executors;

pub use executors::has_executor;

/// Fatal runner errors (as opposed to per-action failures).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("no executor registered for action '{}'", .0.as_str())]
    MissingExecutor(ActionKind),
}

/// Collaborators an executor may use.
pub struct ExecutionContext<'a> {
    pub system: &'a mut dyn IssueSystem,
    pub agent: &'a dyn Agent,
    /// Snapshot the actions were derived from (repo identity, phase labels).
    pub snapshot: &'a Snapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
}

/// What one executor produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    /// Structured output handed to the next executor.
    pub output: Option<Value>,
    /// `prepare-branch` pushed a rebase.
    pub rebased: bool,
}

impl ExecOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn value(output: Value) -> Self {
        Self {
            output: Some(output),
            rebased: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "action", rename_all = "kebab-case")]
pub enum StopReason {
    /// A terminal action (`stop`, `block`, `close-item`) ran.
    Terminal(ActionKind),
    /// An action whose kind stops on error failed.
    Error(ActionKind),
    /// `prepare-branch` pushed a rebase; CI will retrigger.
    Rebased,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub results: Vec<ActionResult>,
    pub stopped_early: bool,
    pub stop_reason: Option<StopReason>,
}

impl RunResult {
    /// True iff every recorded action succeeded or was skipped.
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success || r.skipped)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ActionResult> {
        self.results.iter().filter(|r| !r.success && !r.skipped)
    }
}

/// Execute `actions` in order against the context's collaborators.
///
/// Per-action failures are recorded in the result; only a missing executor is
/// an `Err`. In dry-run mode every action is recorded as successful and
/// skipped, and no executor runs.
#[instrument(skip_all, fields(actions = actions.len(), dry_run = options.dry_run))]
pub fn execute(
    actions: &[Action],
    ctx: &mut ExecutionContext<'_>,
    options: &RunOptions,
) -> Result<RunResult, RunError> {
    let mut results = Vec::with_capacity(actions.len());
    let mut chain: Option<Value> = None;
    let mut stop_reason = None;

    for action in actions {
        let kind = action.kind();
        let executor = executors::lookup(kind).ok_or(RunError::MissingExecutor(kind))?;

        if options.dry_run {
            debug!(action = kind.as_str(), "dry run: skipping");
            results.push(ActionResult {
                action: action.clone(),
                success: true,
                skipped: true,
                error: None,
                output: None,
            });
            continue;
        }

        match executor(action, ctx, chain.as_ref()) {
            Ok(out) => {
                debug!(action = kind.as_str(), rebased = out.rebased, "action succeeded");
                results.push(ActionResult {
                    action: action.clone(),
                    success: true,
                    skipped: false,
                    error: None,
                    output: out.output.clone(),
                });
                chain = out.output;
                if kind.is_terminal() {
                    stop_reason = Some(StopReason::Terminal(kind));
                } else if out.rebased {
                    stop_reason = Some(StopReason::Rebased);
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(action = kind.as_str(), err = %message, "action failed");
                results.push(ActionResult {
                    action: action.clone(),
                    success: false,
                    skipped: false,
                    error: Some(message),
                    output: None,
                });
                chain = None;
                if kind.stops_on_error() {
                    stop_reason = Some(StopReason::Error(kind));
                }
            }
        }

        if stop_reason.is_some() {
            break;
        }
    }

    let stopped_early = stop_reason.is_some() && results.len() < actions.len();
    if let Some(reason) = &stop_reason {
        info!(?reason, executed = results.len(), total = actions.len(), "run stopped");
    }
    Ok(RunResult {
        results,
        stopped_early,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentTask, Status};
    use crate::io::store::ItemRecord;
    use crate::test_support::{MemorySystem, ScriptedAgent, snapshot, working_item};
    use serde_json::json;

    fn system() -> MemorySystem {
        MemorySystem::with_records(vec![ItemRecord::new(working_item(7))])
    }

    fn run(
        system: &mut MemorySystem,
        agent: &ScriptedAgent,
        actions: &[Action],
        dry_run: bool,
    ) -> RunResult {
        let snap = snapshot(working_item(7));
        let mut ctx = ExecutionContext {
            system,
            agent,
            snapshot: &snap,
        };
        execute(actions, &mut ctx, &RunOptions { dry_run }).expect("execute")
    }

    #[test]
    fn every_action_kind_has_an_executor() {
        for kind in ActionKind::ALL {
            assert!(has_executor(kind), "missing executor for {}", kind.as_str());
        }
    }

    #[test]
    fn dry_run_skips_everything_and_succeeds() {
        let mut system = system();
        let before = system.records();
        let actions = vec![
            Action::SetStatus {
                issue: 7,
                status: Status::Done,
            },
            Action::RecordFailure { issue: 7 },
            Action::Block {
                issue: 7,
                reason: "x".to_string(),
            },
        ];
        let result = run(&mut system, &ScriptedAgent::default(), &actions, true);
        assert!(result.success());
        assert!(!result.stopped_early);
        assert_eq!(result.results.len(), 3);
        assert!(result.results.iter().all(|r| r.success && r.skipped));
        assert_eq!(result.failed().count(), 0);
        assert_eq!(system.records(), before);
        assert!(system.calls().is_empty());
    }

    #[test]
    fn terminal_action_stops_the_run() {
        let mut system = system();
        let actions = vec![
            Action::Block {
                issue: 7,
                reason: "budget".to_string(),
            },
            Action::IncrementIteration { issue: 7 },
        ];
        let result = run(&mut system, &ScriptedAgent::default(), &actions, false);
        assert!(result.stopped_early);
        assert_eq!(result.stop_reason, Some(StopReason::Terminal(ActionKind::Block)));
        assert_eq!(result.results.len(), 1);
        assert_eq!(system.get(7).iteration, 0);
    }

    #[test]
    fn failed_comment_does_not_stop() {
        let mut system = system();
        system.fail_on(ActionKind::CreateComment);
        let actions = vec![
            Action::CreateComment {
                issue: 7,
                body: "hello".to_string(),
            },
            Action::IncrementIteration { issue: 7 },
        ];
        let result = run(&mut system, &ScriptedAgent::default(), &actions, false);
        assert!(!result.success());
        assert!(!result.stopped_early);
        assert_eq!(result.results.len(), 2);
        assert_eq!(system.get(7).iteration, 1);
    }

    #[test]
    fn failed_status_change_stops() {
        let mut system = system();
        system.fail_on(ActionKind::SetStatus);
        let actions = vec![
            Action::SetStatus {
                issue: 7,
                status: Status::InReview,
            },
            Action::IncrementIteration { issue: 7 },
        ];
        let result = run(&mut system, &ScriptedAgent::default(), &actions, false);
        assert_eq!(result.stop_reason, Some(StopReason::Error(ActionKind::SetStatus)));
        assert!(result.stopped_early);
        assert_eq!(result.failed().count(), 1);
        assert_eq!(system.get(7).iteration, 0);
    }

    #[test]
    fn rebase_stops_the_run() {
        let mut system = system();
        system.set_behind_default_branch(7);
        let actions = vec![
            Action::PrepareBranch {
                issue: 7,
                branch: "claude/issue/7".to_string(),
            },
            Action::IncrementIteration { issue: 7 },
        ];
        let result = run(&mut system, &ScriptedAgent::default(), &actions, false);
        assert_eq!(result.stop_reason, Some(StopReason::Rebased));
        assert!(result.success());
    }

    #[test]
    fn agent_output_chains_into_apply() {
        let mut system = system();
        let agent = ScriptedAgent::default().respond(
            "triage",
            json!({"labels": ["bug", "backend"], "summary": "bug in backend"}),
        );
        let actions = vec![
            Action::InvokeAgent {
                issue: 7,
                task: AgentTask::Triage,
            },
            Action::ApplyTriageOutput { issue: 7 },
        ];
        let result = run(&mut system, &agent, &actions, false);
        assert!(result.success());
        let labels = system.get(7).labels;
        assert!(labels.contains(&"bug".to_string()));
        assert!(labels.contains(&"backend".to_string()));
    }

    #[test]
    fn chain_is_not_carried_past_the_next_action() {
        let mut system = system();
        let agent = ScriptedAgent::default().respond(
            "triage",
            json!({"labels": ["bug"], "summary": "s"}),
        );
        let actions = vec![
            Action::InvokeAgent {
                issue: 7,
                task: AgentTask::Triage,
            },
            Action::Log {
                message: "between".to_string(),
            },
            Action::ApplyTriageOutput { issue: 7 },
        ];
        let result = run(&mut system, &agent, &actions, false);
        assert_eq!(
            result.stop_reason,
            Some(StopReason::Error(ActionKind::ApplyTriageOutput))
        );
    }
}
