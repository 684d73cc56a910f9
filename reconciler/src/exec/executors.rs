//! One executor per action kind, registered in a static dispatch table.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::{ExecOutput, ExecutionContext};
use crate::core::action::{Action, ActionKind};
use crate::core::predict::{OPENED_PR, UPDATED_PR};
use crate::core::selector::phase_label;
use crate::core::snapshot::HistoryEntry;
use crate::core::types::{AgentTask, ItemState, Status};
use crate::io::agent::{AgentRequest, IterationPayload, ReplyPayload, TriagePayload};
use crate::io::system::BranchSync;

pub(super) type ExecutorFn =
    fn(&Action, &mut ExecutionContext<'_>, Option<&Value>) -> Result<ExecOutput>;

static EXECUTORS: LazyLock<HashMap<ActionKind, ExecutorFn>> = LazyLock::new(|| {
    let mut table: HashMap<ActionKind, ExecutorFn> = HashMap::new();
    table.insert(ActionKind::SetStatus, set_status);
    table.insert(ActionKind::IncrementIteration, increment_iteration);
    table.insert(ActionKind::RecordFailure, record_failure);
    table.insert(ActionKind::ClearFailures, clear_failures);
    table.insert(ActionKind::AddLabels, add_labels);
    table.insert(ActionKind::RemoveLabels, remove_labels);
    table.insert(ActionKind::Assign, assign);
    table.insert(ActionKind::Unassign, unassign);
    table.insert(ActionKind::CreateComment, create_comment);
    table.insert(ActionKind::CreateBranch, create_branch);
    table.insert(ActionKind::PrepareBranch, prepare_branch);
    table.insert(ActionKind::CreateOrUpdatePr, create_or_update_pr);
    table.insert(ActionKind::MarkPrReady, mark_pr_ready);
    table.insert(ActionKind::ConvertPrToDraft, convert_pr_to_draft);
    table.insert(ActionKind::RequestReview, request_review);
    table.insert(ActionKind::InvokeAgent, invoke_agent);
    table.insert(ActionKind::ApplyTriageOutput, apply_triage_output);
    table.insert(ActionKind::ApplyIterationOutput, apply_iteration_output);
    table.insert(ActionKind::PostAgentReply, post_agent_reply);
    table.insert(ActionKind::AppendHistory, append_history);
    table.insert(ActionKind::CloseItem, close_item);
    table.insert(ActionKind::ReopenItem, reopen_item);
    table.insert(ActionKind::Block, block);
    table.insert(ActionKind::Stop, stop);
    table.insert(ActionKind::Log, log);
    table
});

pub(super) fn lookup(kind: ActionKind) -> Option<ExecutorFn> {
    EXECUTORS.get(&kind).copied()
}

pub fn has_executor(kind: ActionKind) -> bool {
    EXECUTORS.contains_key(&kind)
}

fn mismatch(expected: ActionKind, action: &Action) -> anyhow::Error {
    anyhow!(
        "{} executor received a {} action",
        expected.as_str(),
        action.kind().as_str()
    )
}

fn set_status(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::SetStatus { issue, status } = action else {
        return Err(mismatch(ActionKind::SetStatus, action));
    };
    ctx.system
        .set_status(*issue, *status)
        .with_context(|| format!("set status of #{issue} to {status}"))?;
    Ok(ExecOutput::none())
}

fn increment_iteration(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::IncrementIteration { issue } = action else {
        return Err(mismatch(ActionKind::IncrementIteration, action));
    };
    let iteration = ctx
        .system
        .increment_iteration(*issue)
        .with_context(|| format!("increment iteration of #{issue}"))?;
    Ok(ExecOutput::value(json!({ "iteration": iteration })))
}

fn record_failure(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::RecordFailure { issue } = action else {
        return Err(mismatch(ActionKind::RecordFailure, action));
    };
    let failures = ctx
        .system
        .record_failure(*issue)
        .with_context(|| format!("record failure on #{issue}"))?;
    Ok(ExecOutput::value(json!({ "failures": failures })))
}

fn clear_failures(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::ClearFailures { issue } = action else {
        return Err(mismatch(ActionKind::ClearFailures, action));
    };
    ctx.system
        .clear_failures(*issue)
        .with_context(|| format!("clear failures on #{issue}"))?;
    Ok(ExecOutput::none())
}

fn add_labels(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::AddLabels { issue, labels } = action else {
        return Err(mismatch(ActionKind::AddLabels, action));
    };
    ctx.system
        .add_labels(*issue, labels)
        .with_context(|| format!("add labels {labels:?} to #{issue}"))?;
    Ok(ExecOutput::none())
}

fn remove_labels(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::RemoveLabels { issue, labels } = action else {
        return Err(mismatch(ActionKind::RemoveLabels, action));
    };
    ctx.system
        .remove_labels(*issue, labels)
        .with_context(|| format!("remove labels {labels:?} from #{issue}"))?;
    Ok(ExecOutput::none())
}

fn assign(action: &Action, ctx: &mut ExecutionContext<'_>, _: Option<&Value>) -> Result<ExecOutput> {
    let Action::Assign { issue, login } = action else {
        return Err(mismatch(ActionKind::Assign, action));
    };
    ctx.system
        .assign(*issue, login)
        .with_context(|| format!("assign {login} to #{issue}"))?;
    Ok(ExecOutput::none())
}

fn unassign(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::Unassign { issue, login } = action else {
        return Err(mismatch(ActionKind::Unassign, action));
    };
    ctx.system
        .unassign(*issue, login)
        .with_context(|| format!("unassign {login} from #{issue}"))?;
    Ok(ExecOutput::none())
}

fn create_comment(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::CreateComment { issue, body } = action else {
        return Err(mismatch(ActionKind::CreateComment, action));
    };
    let id = ctx
        .system
        .create_comment(*issue, body)
        .with_context(|| format!("comment on #{issue}"))?;
    Ok(ExecOutput::value(json!({ "comment_id": id })))
}

fn create_branch(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::CreateBranch { issue, branch } = action else {
        return Err(mismatch(ActionKind::CreateBranch, action));
    };
    ctx.system
        .create_branch(*issue, branch)
        .with_context(|| format!("create branch {branch} for #{issue}"))?;
    Ok(ExecOutput::none())
}

fn prepare_branch(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::PrepareBranch { issue, branch } = action else {
        return Err(mismatch(ActionKind::PrepareBranch, action));
    };
    let sync = ctx
        .system
        .prepare_branch(*issue, branch)
        .with_context(|| format!("prepare branch {branch} for #{issue}"))?;
    Ok(ExecOutput {
        output: Some(json!({ "branch": branch, "sync": sync })),
        rebased: sync == BranchSync::Rebased,
    })
}

fn create_or_update_pr(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::CreateOrUpdatePr {
        issue,
        branch,
        title,
        draft,
    } = action
    else {
        return Err(mismatch(ActionKind::CreateOrUpdatePr, action));
    };
    let pr = ctx
        .system
        .create_or_update_pr(*issue, branch, title, *draft)
        .with_context(|| format!("create or update PR for #{issue}"))?;

    let text = if pr.created {
        format!("✅ {OPENED_PR} #{}", pr.number)
    } else {
        format!("🔄 {UPDATED_PR} #{}", pr.number)
    };
    let mut item = ctx.system.item(*issue)?;
    item.body.history.push(HistoryEntry::new(
        item.iteration,
        phase_label(ctx.snapshot, *issue),
        text,
    ));
    ctx.system
        .persist_body(*issue, &item.body)
        .with_context(|| format!("record PR history on #{issue}"))?;
    Ok(ExecOutput::value(json!({ "pr": pr.number, "created": pr.created })))
}

fn mark_pr_ready(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::MarkPrReady { issue } = action else {
        return Err(mismatch(ActionKind::MarkPrReady, action));
    };
    ctx.system
        .set_pr_draft(*issue, false)
        .with_context(|| format!("mark PR of #{issue} ready"))?;
    Ok(ExecOutput::none())
}

fn convert_pr_to_draft(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::ConvertPrToDraft { issue } = action else {
        return Err(mismatch(ActionKind::ConvertPrToDraft, action));
    };
    ctx.system
        .set_pr_draft(*issue, true)
        .with_context(|| format!("convert PR of #{issue} to draft"))?;
    Ok(ExecOutput::none())
}

fn request_review(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::RequestReview { issue, reviewer } = action else {
        return Err(mismatch(ActionKind::RequestReview, action));
    };
    ctx.system
        .request_review(*issue, reviewer)
        .with_context(|| format!("request review from {reviewer} on #{issue}"))?;
    Ok(ExecOutput::none())
}

#[instrument(skip_all, fields(issue = ?action.issue(), task = tracing::field::Empty))]
fn invoke_agent(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::InvokeAgent { issue, task } = action else {
        return Err(mismatch(ActionKind::InvokeAgent, action));
    };
    tracing::Span::current().record("task", task.name());
    let request = AgentRequest {
        repo: ctx.snapshot.repo.clone(),
        item: ctx.system.item(*issue)?,
        phase: phase_label(ctx.snapshot, *issue),
        task: task.clone(),
    };
    let response = ctx
        .agent
        .invoke(&request)
        .with_context(|| format!("invoke agent for {} on #{issue}", task.name()))?;
    if !response.success {
        bail!("agent {} failed on #{issue}: {}", task.name(), response.summary);
    }
    info!(summary = %response.summary, "agent succeeded");
    Ok(ExecOutput::value(json!({
        "task": task.name(),
        "summary": response.summary,
        "payload": response.payload,
    })))
}

/// Payload of the preceding `invoke-agent`, checked against the accepted tasks.
fn agent_payload<T: DeserializeOwned>(
    previous: Option<&Value>,
    accepted: &[&str],
    consumer: ActionKind,
) -> Result<T> {
    let previous = previous.ok_or_else(|| {
        anyhow!(
            "{} requires output from a preceding invoke-agent",
            consumer.as_str()
        )
    })?;
    let task = previous.get("task").and_then(Value::as_str).unwrap_or_default();
    if !accepted.contains(&task) {
        bail!(
            "{} cannot consume output of task '{task}'",
            consumer.as_str()
        );
    }
    let payload = previous
        .get("payload")
        .cloned()
        .filter(|p| !p.is_null())
        .ok_or_else(|| anyhow!("agent output for '{task}' has no payload"))?;
    serde_json::from_value(payload).with_context(|| format!("decode '{task}' payload"))
}

fn apply_triage_output(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    previous: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::ApplyTriageOutput { issue } = action else {
        return Err(mismatch(ActionKind::ApplyTriageOutput, action));
    };
    let payload: TriagePayload = agent_payload(
        previous,
        &[AgentTask::Triage.name()],
        ActionKind::ApplyTriageOutput,
    )?;
    if !payload.labels.is_empty() {
        ctx.system
            .add_labels(*issue, &payload.labels)
            .with_context(|| format!("apply triage labels to #{issue}"))?;
    }
    Ok(ExecOutput::value(json!({ "labels": payload.labels })))
}

fn apply_iteration_output(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    previous: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::ApplyIterationOutput { issue } = action else {
        return Err(mismatch(ActionKind::ApplyIterationOutput, action));
    };
    let payload: IterationPayload = agent_payload(
        previous,
        &["iterate", "fix-ci", "address-review"],
        ActionKind::ApplyIterationOutput,
    )?;
    let mut body = ctx.system.item(*issue)?.body;
    // never uncheck todos, never exceed the total
    body.todos.completed = body
        .todos
        .completed
        .max(payload.todos_completed.min(body.todos.total));
    if payload.notes.as_deref().is_some_and(|n| !n.trim().is_empty()) {
        body.has_agent_notes = true;
    }
    ctx.system
        .persist_body(*issue, &body)
        .with_context(|| format!("apply iteration output to #{issue}"))?;
    Ok(ExecOutput::value(json!({ "todos_completed": body.todos.completed })))
}

fn post_agent_reply(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    previous: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::PostAgentReply { issue } = action else {
        return Err(mismatch(ActionKind::PostAgentReply, action));
    };
    let payload: ReplyPayload = agent_payload(
        previous,
        &["respond-to-comment"],
        ActionKind::PostAgentReply,
    )?;
    let id = ctx
        .system
        .create_comment(*issue, &payload.reply)
        .with_context(|| format!("post agent reply on #{issue}"))?;
    Ok(ExecOutput::value(json!({ "comment_id": id })))
}

fn append_history(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::AppendHistory { issue, entry } = action else {
        return Err(mismatch(ActionKind::AppendHistory, action));
    };
    let mut body = ctx.system.item(*issue)?.body;
    body.history.push(entry.clone());
    ctx.system
        .persist_body(*issue, &body)
        .with_context(|| format!("append history to #{issue}"))?;
    Ok(ExecOutput::none())
}

fn close_item(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::CloseItem { issue } = action else {
        return Err(mismatch(ActionKind::CloseItem, action));
    };
    ctx.system
        .set_state(*issue, ItemState::Closed)
        .with_context(|| format!("close #{issue}"))?;
    Ok(ExecOutput::none())
}

fn reopen_item(
    action: &Action,
    ctx: &mut ExecutionContext<'_>,
    _: Option<&Value>,
) -> Result<ExecOutput> {
    let Action::ReopenItem { issue } = action else {
        return Err(mismatch(ActionKind::ReopenItem, action));
    };
    ctx.system
        .set_state(*issue, ItemState::Open)
        .with_context(|| format!("reopen #{issue}"))?;
    Ok(ExecOutput::none())
}

fn block(action: &Action, ctx: &mut ExecutionContext<'_>, _: Option<&Value>) -> Result<ExecOutput> {
    let Action::Block { issue, reason } = action else {
        return Err(mismatch(ActionKind::Block, action));
    };
    ctx.system
        .set_status(*issue, Status::Blocked)
        .with_context(|| format!("block #{issue}"))?;
    ctx.system
        .create_comment(*issue, &format!("Automation blocked: {reason}"))
        .with_context(|| format!("record block reason on #{issue}"))?;
    Ok(ExecOutput::value(json!({ "reason": reason })))
}

fn stop(action: &Action, _: &mut ExecutionContext<'_>, _: Option<&Value>) -> Result<ExecOutput> {
    let Action::Stop { reason } = action else {
        return Err(mismatch(ActionKind::Stop, action));
    };
    info!(reason = %reason, "stop requested");
    Ok(ExecOutput::none())
}

fn log(action: &Action, _: &mut ExecutionContext<'_>, _: Option<&Value>) -> Result<ExecOutput> {
    let Action::Log { message } = action else {
        return Err(mismatch(ActionKind::Log, action));
    };
    info!(message = %message, "log action");
    Ok(ExecOutput::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::predict::{PredictMeta, predict};
    use crate::core::tree::PredictableTree;
    use crate::core::types::Target;
    use crate::core::verify::compare;
    use crate::io::store::ItemRecord;
    use crate::io::system::IssueSystem;
    use crate::test_support::{MemorySystem, ScriptedAgent, phase, snapshot_with_phases, working_item};

    fn context<'a>(
        system: &'a mut MemorySystem,
        agent: &'a ScriptedAgent,
        snapshot: &'a crate::core::snapshot::Snapshot,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            system,
            agent,
            snapshot,
        }
    }

    #[test]
    fn executor_rejects_wrong_variant() {
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = ScriptedAgent::default();
        let snap = snapshot_with_phases(working_item(7), Vec::new());
        let mut ctx = context(&mut system, &agent, &snap);
        let err = set_status(&Action::IncrementIteration { issue: 7 }, &mut ctx, None)
            .expect_err("mismatch");
        assert!(err.to_string().contains("set-status executor received"));
    }

    #[test]
    fn pr_history_uses_phase_label_and_decoration() {
        let mut system = MemorySystem::with_records(vec![
            ItemRecord::new(working_item(10)),
            ItemRecord::phase_of(10, 2, working_item(12)),
        ]);
        let agent = ScriptedAgent::default();
        let snap = snapshot_with_phases(working_item(10), vec![phase(2, 12, Some(Status::InProgress))]);
        let mut ctx = context(&mut system, &agent, &snap);
        let action = Action::CreateOrUpdatePr {
            issue: 12,
            branch: "claude/issue/12".to_string(),
            title: "Phase two".to_string(),
            draft: true,
        };
        let out = create_or_update_pr(&action, &mut ctx, None).expect("pr");
        assert_eq!(out.output.as_ref().and_then(|v| v.get("created")), Some(&json!(true)));
        let history = system.get(12).body.history;
        let last = history.last().expect("history");
        assert_eq!(last.phase, "2");
        assert!(last.action.starts_with("✅ Opened PR #"));
    }

    #[test]
    fn iteration_output_never_unchecks_or_overflows_todos() {
        let mut item = working_item(7);
        item.body.todos.total = 4;
        item.body.todos.completed = 2;
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(item.clone())]);
        let agent = ScriptedAgent::default();
        let snap = snapshot_with_phases(item, Vec::new());
        let mut ctx = context(&mut system, &agent, &snap);
        let previous = json!({
            "task": "iterate",
            "summary": "s",
            "payload": {"todos_completed": 9, "notes": "left notes", "summary": "s"}
        });
        apply_iteration_output(&Action::ApplyIterationOutput { issue: 7 }, &mut ctx, Some(&previous))
            .expect("apply");
        let body = system.get(7).body;
        assert_eq!(body.todos.completed, 4);
        assert!(body.has_agent_notes);
    }

    #[test]
    fn reply_requires_reply_task_output() {
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = ScriptedAgent::default();
        let snap = snapshot_with_phases(working_item(7), Vec::new());
        let mut ctx = context(&mut system, &agent, &snap);
        let previous = json!({"task": "triage", "summary": "", "payload": {"labels": [], "summary": ""}});
        let err = post_agent_reply(&Action::PostAgentReply { issue: 7 }, &mut ctx, Some(&previous))
            .expect_err("wrong task");
        assert!(err.to_string().contains("cannot consume output of task 'triage'"));
    }

    #[test]
    fn failed_agent_response_is_an_error() {
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = ScriptedAgent::default().fail("iterate", "compile error");
        let snap = snapshot_with_phases(working_item(7), Vec::new());
        let mut ctx = context(&mut system, &agent, &snap);
        let err = invoke_agent(
            &Action::InvokeAgent {
                issue: 7,
                task: AgentTask::Iterate,
            },
            &mut ctx,
            None,
        )
        .expect_err("agent failed");
        assert!(err.to_string().contains("compile error"));
    }

    #[test]
    fn lone_block_sets_status_and_verifies() {
        let mut system = MemorySystem::with_records(vec![ItemRecord::new(working_item(7))]);
        let agent = ScriptedAgent::default();
        let snap = snapshot_with_phases(working_item(7), Vec::new());
        let action = Action::Block {
            issue: 7,
            reason: "needs a human".to_string(),
        };
        let expected = predict(
            std::slice::from_ref(&action),
            &PredictableTree::from_snapshot(&snap),
            &snap,
            &PredictMeta {
                target: Target::Blocked,
                rule: "block".to_string(),
                signal: "edited".to_string(),
            },
        );

        let mut ctx = context(&mut system, &agent, &snap);
        block(&action, &mut ctx, None).expect("block");
        assert_eq!(system.get(7).status, Some(Status::Blocked));

        let after = system.fetch(7).expect("fetch");
        let verification =
            compare(&expected, &PredictableTree::from_snapshot(&after)).expect("compare");
        assert!(verification.pass, "{:?}", verification.best_match);
    }
}
