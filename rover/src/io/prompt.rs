//! Prompt rendering for the agent and the AI collaborator.

use minijinja::{Environment, context};
use tracing::debug;

use crate::io::iteration::PreviousContext;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");
const EXPAND_TASK_TEMPLATE: &str = include_str!("prompts/expand_task.md");
const EXPAND_ITERATION_TEMPLATE: &str = include_str!("prompts/expand_iteration.md");
const COMMIT_MESSAGE_TEMPLATE: &str = include_str!("prompts/commit_message.md");
const RESOLVE_CONFLICT_TEMPLATE: &str = include_str!("prompts/resolve_conflict.md");

/// Inputs for the prompt an agent receives for one iteration.
#[derive(Debug, Clone)]
pub struct AgentPrompt<'a> {
    pub task_id: u64,
    pub iteration: u32,
    pub title: &'a str,
    pub description: &'a str,
    pub previous: Option<&'a PreviousContext>,
}

/// Inputs for a commit message suggestion.
#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    pub title: String,
    pub description: String,
    pub recent_commits: Vec<String>,
    pub summaries: Vec<String>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("agent", AGENT_TEMPLATE)?;
        env.add_template("expand_task", EXPAND_TASK_TEMPLATE)?;
        env.add_template("expand_iteration", EXPAND_ITERATION_TEMPLATE)?;
        env.add_template("commit_message", COMMIT_MESSAGE_TEMPLATE)?;
        env.add_template("resolve_conflict", RESOLVE_CONFLICT_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn agent(&self, input: &AgentPrompt<'_>) -> Result<String, minijinja::Error> {
        debug!(task_id = input.task_id, iteration = input.iteration, "rendering agent prompt");
        self.env.get_template("agent")?.render(context! {
            task_id => input.task_id,
            iteration => input.iteration,
            title => input.title.trim(),
            description => input.description.trim(),
            previous => input.previous.filter(|p| !p.is_empty()),
        })
    }

    pub fn expand_task(&self, description: &str) -> Result<String, minijinja::Error> {
        self.env.get_template("expand_task")?.render(context! {
            description => description.trim(),
        })
    }

    pub fn expand_iteration(
        &self,
        title: &str,
        description: &str,
        instructions: &str,
        previous: Option<&PreviousContext>,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("expand_iteration")?.render(context! {
            title => title.trim(),
            description => description.trim(),
            instructions => instructions.trim(),
            previous => previous,
        })
    }

    pub fn commit_message(&self, input: &CommitContext) -> Result<String, minijinja::Error> {
        self.env.get_template("commit_message")?.render(context! {
            title => input.title.trim(),
            description => input.description.trim(),
            recent_commits => &input.recent_commits,
            summaries => &input.summaries,
        })
    }

    pub fn resolve_conflict(
        &self,
        path: &str,
        content: &str,
        recent_commits: &[String],
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("resolve_conflict")?.render(context! {
            path => path,
            content => content,
            recent_commits => recent_commits,
        })
    }
}
