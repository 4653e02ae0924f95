//! AI collaborator used for titles, commit messages and conflict resolution.
//!
//! Every call is best-effort: callers fall back to deterministic behaviour on
//! any [`AiError`]. [`AgentCli`] drives a non-interactive AI CLI through the
//! [`CommandRunner`], passing the rendered prompt on stdin.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::commit::single_line_message;
use crate::core::conflict::has_conflict_markers;
use crate::core::task::TaskRecord;
use crate::io::iteration::PreviousContext;
use crate::io::process::{CommandRunner, RunOptions};
use crate::io::prompt::{CommitContext, PromptEngine};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out")]
    TimedOut { program: String },

    #[error("{program} reply exceeded the output limit")]
    Truncated { program: String },

    #[error("empty reply")]
    Empty,

    #[error("unusable reply: {0}")]
    Unparseable(String),

    #[error("resolved file still contains conflict markers")]
    MarkersRemain,

    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
}

/// A title/description pair suggested by the AI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExpansion {
    pub title: String,
    pub description: String,
}

/// The narrow request/response contracts rover needs from an AI.
pub trait AiCollaborator {
    fn expand_task(&self, description: &str) -> Result<TaskExpansion, AiError>;

    fn expand_iteration(
        &self,
        task: &TaskRecord,
        instructions: &str,
        previous: Option<&PreviousContext>,
    ) -> Result<TaskExpansion, AiError>;

    /// A single-line commit subject.
    fn commit_message(&self, context: &CommitContext) -> Result<String, AiError>;

    /// Full file contents with every conflict marker removed.
    fn resolve_conflict(
        &self,
        path: &str,
        content: &str,
        recent_commits: &[String],
    ) -> Result<String, AiError>;
}

/// AI collaborator backed by a CLI such as `claude -p`.
pub struct AgentCli<'r> {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    runner: &'r dyn CommandRunner,
    prompts: PromptEngine,
}

impl<'r> AgentCli<'r> {
    pub fn new(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        runner: &'r dyn CommandRunner,
    ) -> Result<Self, AiError> {
        Ok(Self {
            command,
            workdir: workdir.into(),
            timeout,
            runner,
            prompts: PromptEngine::new()?,
        })
    }

    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn ask(&self, prompt: &str) -> Result<String, AiError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(AiError::Spawn {
                program: String::new(),
                source: std::io::Error::other("ai_command is empty"),
            });
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let options = RunOptions {
            cwd: Some(self.workdir.clone()),
            stdin: Some(prompt.as_bytes().to_vec()),
            timeout: Some(self.timeout),
        };
        debug!(program = %program, "asking AI");
        let output = self
            .runner
            .run(program, &args, &options)
            .map_err(|source| AiError::Spawn {
                program: program.clone(),
                source,
            })?;
        if output.timed_out {
            return Err(AiError::TimedOut {
                program: program.clone(),
            });
        }
        if !output.success() {
            warn!(exit_code = ?output.exit_code, "AI command failed");
            return Err(AiError::Failed {
                program: program.clone(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        if output.stdout_truncated {
            warn!("AI reply truncated");
            return Err(AiError::Truncated {
                program: program.clone(),
            });
        }
        if output.stdout.trim().is_empty() {
            return Err(AiError::Empty);
        }
        Ok(output.stdout)
    }
}

impl AiCollaborator for AgentCli<'_> {
    fn expand_task(&self, description: &str) -> Result<TaskExpansion, AiError> {
        let prompt = self.prompts.expand_task(description)?;
        parse_expansion(&self.ask(&prompt)?)
    }

    fn expand_iteration(
        &self,
        task: &TaskRecord,
        instructions: &str,
        previous: Option<&PreviousContext>,
    ) -> Result<TaskExpansion, AiError> {
        let prompt =
            self.prompts
                .expand_iteration(&task.title, &task.description, instructions, previous)?;
        parse_expansion(&self.ask(&prompt)?)
    }

    fn commit_message(&self, context: &CommitContext) -> Result<String, AiError> {
        let prompt = self.prompts.commit_message(context)?;
        single_line_message(&self.ask(&prompt)?).ok_or(AiError::Empty)
    }

    fn resolve_conflict(
        &self,
        path: &str,
        content: &str,
        recent_commits: &[String],
    ) -> Result<String, AiError> {
        let prompt = self.prompts.resolve_conflict(path, content, recent_commits)?;
        parse_resolution(&self.ask(&prompt)?)
    }
}

/// Extract the `{title, description}` object from a reply that may wrap it in prose.
pub fn parse_expansion(reply: &str) -> Result<TaskExpansion, AiError> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(AiError::Unparseable("no JSON object in reply".to_string()));
    };
    if end < start {
        return Err(AiError::Unparseable("no JSON object in reply".to_string()));
    }
    let expansion: TaskExpansion = serde_json::from_str(&reply[start..=end])
        .map_err(|e| AiError::Unparseable(e.to_string()))?;
    if expansion.title.trim().is_empty() {
        return Err(AiError::Unparseable("empty title".to_string()));
    }
    Ok(TaskExpansion {
        title: expansion.title.trim().to_string(),
        description: expansion.description.trim().to_string(),
    })
}

/// Strip an optional code fence and reject replies that still carry markers.
pub fn parse_resolution(reply: &str) -> Result<String, AiError> {
    let trimmed = reply.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let after_info = rest.split_once('\n').map_or("", |(_, body)| body);
            after_info
                .trim_end()
                .strip_suffix("```")
                .unwrap_or(after_info)
                .to_string()
        }
        None => reply.to_string(),
    };
    if body.trim().is_empty() {
        return Err(AiError::Empty);
    }
    if has_conflict_markers(&body) {
        return Err(AiError::MarkersRemain);
    }
    let mut body = body;
    if !body.ends_with('\n') {
        body.push('\n');
    }
    Ok(body)
}
