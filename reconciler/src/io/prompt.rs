//! Agent prompt rendering with a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::snapshot::{HistoryEntry, Repo, WorkItem};
use crate::core::types::AgentTask;

const TRIAGE_TEMPLATE: &str = include_str!("prompts/triage.md");
const ITERATE_TEMPLATE: &str = include_str!("prompts/iterate.md");
const COMMENT_TEMPLATE: &str = include_str!("prompts/comment.md");

/// Most recent history rows shown to the agent.
const HISTORY_TAIL: usize = 20;

/// Flattened item view for templates.
#[derive(Debug, Clone, Serialize)]
struct ItemContext {
    number: u64,
    title: String,
    status: String,
    iteration: u32,
    failures: u32,
    labels: Vec<String>,
    has_description: bool,
    todo_total: u32,
    todo_completed: u32,
    todo_manual: u32,
    question_total: u32,
    question_answered: u32,
}

impl ItemContext {
    fn from_item(item: &WorkItem) -> Self {
        let body = &item.body;
        Self {
            number: item.number,
            title: item.title.clone(),
            status: item
                .status
                .map_or_else(|| "none".to_string(), |s| s.as_str().to_string()),
            iteration: item.iteration,
            failures: item.failures,
            labels: item.labels.clone(),
            has_description: body.has_description,
            todo_total: body.todos.total,
            todo_completed: body.todos.completed,
            todo_manual: body.todos.manual_outstanding,
            question_total: body.questions.total,
            question_answered: body.questions.answered,
        }
    }
}

/// Everything a prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub repo: Repo,
    pub item: WorkItem,
    /// Phase label (`"-"` outside phases).
    pub phase: String,
    pub task: AgentTask,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("triage", TRIAGE_TEMPLATE)
            .context("load triage template")?;
        env.add_template("iterate", ITERATE_TEMPLATE)
            .context("load iterate template")?;
        env.add_template("comment", COMMENT_TEMPLATE)
            .context("load comment template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs) -> Result<String> {
        let name = match input.task {
            AgentTask::Triage => "triage",
            AgentTask::RespondToComment { .. } => "comment",
            AgentTask::Iterate | AgentTask::FixCi { .. } | AgentTask::AddressReview { .. } => {
                "iterate"
            }
        };
        let history: Vec<&HistoryEntry> = {
            let all = &input.item.body.history;
            all.iter().skip(all.len().saturating_sub(HISTORY_TAIL)).collect()
        };
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {
                repo => format!("{}/{}", input.repo.owner, input.repo.name),
                item => ItemContext::from_item(&input.item),
                phase => input.phase.as_str(),
                task => &input.task,
                history => history,
            })
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<Section> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .unwrap_or_else(|err| panic!("section marker regex is invalid: {err}"))
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(all), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = kind.as_str() == "required";
        let content = rendered[all.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections (least useful first) until the budget fits,
/// then truncate the last section if still over.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |secs: &[Section]| secs.iter().map(|s| s.content.len()).sum::<usize>();
    for key in ["questions", "history", "item"] {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(section = key, bytes = sections[idx].content.len(), "dropped section for budget");
            sections.remove(idx);
        }
    }

    let used = total(sections);
    if used <= budget {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let allowed = last.content.len().saturating_sub(used - budget);
        let mut cut = allowed.saturating_sub(12);
        while cut > 0 && !last.content.is_char_boundary(cut) {
            cut -= 1;
        }
        last.content.truncate(cut);
        last.content.push_str("\n[truncated]");
        debug!(section = %last.key, "truncated section for budget");
    }
}

/// Builds agent prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> Result<String> {
        let rendered = PromptEngine::new()?.render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
