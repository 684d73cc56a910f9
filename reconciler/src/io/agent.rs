//! Agent abstraction and the subprocess-backed implementation.
//!
//! The [`Agent`] trait decouples the `invoke-agent` executor from the actual
//! agent backend. [`CommandAgent`] pipes a rendered prompt into a configured
//! command and reads a JSON payload back from its stdout; tests use scripted
//! agents that return canned responses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::snapshot::{Repo, WorkItem};
use crate::core::types::AgentTask;
use crate::io::config::ReconcilerConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::io::prompt::{PromptBuilder, PromptInputs};

const TRIAGE_SCHEMA: &str = include_str!("../../schemas/agent/triage.schema.json");
const ITERATION_SCHEMA: &str = include_str!("../../schemas/agent/iteration.schema.json");
const REPLY_SCHEMA: &str = include_str!("../../schemas/agent/reply.schema.json");

/// What the agent is asked to do, with the item state it works from.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub repo: Repo,
    pub item: WorkItem,
    /// Phase label (`"-"` outside phases).
    pub phase: String,
    pub task: AgentTask,
}

/// Structured agent result. `payload` is schema-valid when `success` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub payload: Option<Value>,
    pub summary: String,
}

impl AgentResponse {
    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            summary: summary.into(),
        }
    }
}

pub trait Agent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Payload of a triage task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriagePayload {
    pub labels: Vec<String>,
    pub summary: String,
}

/// Payload of an iterate / fix-ci / address-review task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IterationPayload {
    /// Total todos checked off after the agent's work.
    pub todos_completed: u32,
    #[serde(default)]
    pub notes: Option<String>,
    pub summary: String,
}

/// Payload of a respond-to-comment task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyPayload {
    pub reply: String,
    pub summary: String,
}

/// JSON Schema the payload of `task` must satisfy.
pub fn output_schema(task: &AgentTask) -> &'static str {
    match task {
        AgentTask::Triage => TRIAGE_SCHEMA,
        AgentTask::RespondToComment { .. } => REPLY_SCHEMA,
        AgentTask::Iterate | AgentTask::FixCi { .. } | AgentTask::AddressReview { .. } => {
            ITERATION_SCHEMA
        }
    }
}

/// Validate an agent payload against the task's output schema.
pub fn validate_payload(task: &AgentTask, payload: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(output_schema(task))
        .with_context(|| format!("parse {} output schema", task.name()))?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(payload) {
        let messages = compiled
            .iter_errors(payload)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{} output failed schema validation: {}",
            task.name(),
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Last line of `stdout` that parses as a JSON object, or the whole text.
pub fn last_json_object(stdout: &str) -> Option<Value> {
    let from_lines = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<Value>(line).ok().filter(Value::is_object));
    from_lines.or_else(|| {
        serde_json::from_str::<Value>(stdout.trim())
            .ok()
            .filter(Value::is_object)
    })
}

/// Agent that runs an external command with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    prompts: PromptBuilder,
}

impl CommandAgent {
    pub fn new(workdir: &Path, config: &ReconcilerConfig) -> Self {
        Self {
            command: config.agent.command.clone(),
            workdir: workdir.to_path_buf(),
            timeout: Duration::from_secs(config.agent.timeout_secs),
            output_limit_bytes: config.agent.output_limit_bytes,
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
        }
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(issue = request.item.number, task = request.task.name()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let prompt = self.prompts.build(&PromptInputs {
            repo: request.repo.clone(),
            item: request.item.clone(),
            phase: request.phase.clone(),
            task: request.task.clone(),
        })?;
        info!(prompt_bytes = prompt.len(), "invoking agent");

        let mut cmd = command_from_argv(&self.command)?;
        cmd.current_dir(&self.workdir)
            .env("RECONCILER_TASK", request.task.name())
            .env("RECONCILER_ITEM", request.item.number.to_string());
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run agent command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Ok(AgentResponse::failed(format!(
                "agent timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Ok(AgentResponse::failed(format!(
                "agent exited with status {:?}: {}",
                output.status.code(),
                output.stderr_tail()
            )));
        }

        let Some(payload) = last_json_object(&output.stdout_text()) else {
            return Ok(AgentResponse::failed("agent produced no JSON object on stdout"));
        };
        if let Err(err) = validate_payload(&request.task, &payload) {
            return Ok(AgentResponse::failed(format!("{err:#}")));
        }
        let summary = payload
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(summary = %summary, "agent completed");
        Ok(AgentResponse {
            success: true,
            payload: Some(payload),
            summary,
        })
    }
}
