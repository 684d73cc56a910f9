//! Reconciler configuration stored under `.reconciler/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::guards::EngineConfig;
use crate::core::snapshot::Repo;

/// Reconciler configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Failures tolerated before the circuit breaker blocks the item.
    pub max_retries: u32,

    /// Login the automation acts as (assignee that enables the loop).
    pub bot_login: String,

    /// Reviewer requested when a PR becomes ready.
    pub reviewer: Option<String>,

    /// Branch prefix; the item number is appended.
    pub branch_prefix: String,

    /// Record every action as skipped instead of executing it.
    pub dry_run: bool,

    /// Upper bound on rendered agent prompts.
    pub prompt_budget_bytes: usize,

    /// Repository the tracked items belong to.
    pub repo: Repo,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that receives the prompt on stdin (e.g. `["claude","-p"]`).
    pub command: Vec<String>,

    pub timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            max_retries: engine.max_retries,
            bot_login: engine.bot_login,
            reviewer: engine.reviewer,
            branch_prefix: engine.branch_prefix,
            dry_run: false,
            prompt_budget_bytes: 40_000,
            repo: Repo::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.bot_login.trim().is_empty() {
            return Err(anyhow!("bot_login must be non-empty"));
        }
        if self
            .reviewer
            .as_deref()
            .is_some_and(|r| r.trim().is_empty())
        {
            return Err(anyhow!("reviewer must be non-empty when set"));
        }
        if self.branch_prefix.trim_matches('/').trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Settings the transition engine reads.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_retries: self.max_retries,
            bot_login: self.bot_login.clone(),
            reviewer: self.reviewer.clone(),
            branch_prefix: self.branch_prefix.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReconcilerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReconcilerConfig> {
    if !path.exists() {
        let cfg = ReconcilerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReconcilerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ReconcilerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}
