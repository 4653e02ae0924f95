//! Rover: run coding agents on isolated git worktrees.
//!
//! Each task gets its own branch and worktree under `.rover/tasks/<id>/`. An
//! agent runs inside a container against that worktree, iteration by
//! iteration, and the result is pushed or merged back when the operator says so.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use rover::error::RoverError;
use rover::exit_codes;
use rover::io::ai::AgentCli;
use rover::io::config::{RoverConfig, load_config, write_config};
use rover::io::confirm::{AssumeYes, Confirm, TerminalConfirm};
use rover::io::git::Git;
use rover::io::launcher::DockerLauncher;
use rover::io::layout::{RoverPaths, ensure_layout};
use rover::io::process::SystemRunner;
use rover::logging;
use rover::merge::MergeOutcome;
use rover::orchestrator::{DiffRequest, Orchestrator, Services, StartRequest};
use rover::output::{DiffView, Human, ListView, OutputMode, WorkflowCheck, emit};

#[derive(Parser)]
#[command(
    name = "rover",
    version,
    about = "Run coding agents on isolated git worktrees"
)]
struct Cli {
    /// Print outcomes as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Answer yes to every confirmation.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Debug diagnostics on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.rover/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Create a task and run its first iteration.
    Start {
        /// What the agent should do.
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
        /// Use this title instead of asking the AI for one.
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        /// Branch the task branch starts from (default: current branch).
        #[arg(long)]
        source_branch: Option<String>,
        /// Return once the container is running.
        #[arg(short, long)]
        detach: bool,
    },
    /// Run another iteration with refinement instructions.
    Iterate {
        id: u64,
        #[arg(required = true, num_args = 1..)]
        instructions: Vec<String>,
        #[arg(short, long)]
        detach: bool,
    },
    /// List tasks and refresh the status of running ones.
    List,
    /// Show a task and one of its iterations (default: latest).
    Inspect {
        id: u64,
        #[arg(long)]
        iteration: Option<u32>,
    },
    /// Show changes in a task's workspace.
    Diff {
        id: u64,
        /// Restrict to this path.
        path: Option<String>,
        /// Compare against this branch.
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        name_only: bool,
        /// Leave out untracked files.
        #[arg(long)]
        tracked_only: bool,
    },
    /// Show agent container logs.
    Logs {
        id: u64,
        #[arg(long)]
        iteration: Option<u32>,
        #[arg(short, long)]
        follow: bool,
    },
    /// Commit workspace changes and push the task branch.
    Push {
        id: u64,
        /// Commit message (default: AI-suggested).
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Merge the task branch into the current branch.
    Merge {
        id: u64,
        /// Keep the worktree and branch after merging.
        #[arg(long)]
        keep: bool,
    },
    /// Stop the task's running container.
    Stop { id: u64 },
    /// Re-run the latest iteration of a task.
    Restart {
        id: u64,
        #[arg(short, long)]
        detach: bool,
    },
    /// Remove the workspace and branch and set the task back to new.
    Reset { id: u64 },
    /// Remove a task with its workspace, branch and files.
    Delete { id: u64 },
    /// Workflow definition tools.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },
}

#[derive(Subcommand)]
enum WorkflowCommand {
    /// Load and validate a workflow file.
    Validate { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<RoverError>() {
        return match err {
            e if e.is_not_found() => exit_codes::NOT_FOUND,
            RoverError::Validation(_) | RoverError::Schema { .. } => exit_codes::INVALID,
            RoverError::DirtyTree { .. } => exit_codes::MERGE_ABORTED,
            _ => exit_codes::FAILED,
        };
    }
    if let Some(workflow::WorkflowError::Invalid(_)) = err.downcast_ref::<workflow::WorkflowError>()
    {
        return exit_codes::INVALID;
    }
    exit_codes::FAILED
}

fn run(cli: Cli) -> Result<i32> {
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let root = std::env::current_dir().context("resolve current directory")?;

    match cli.command {
        Command::Init { force } => cmd_init(&root, force, mode),
        Command::Workflow {
            command: WorkflowCommand::Validate { file },
        } => cmd_workflow_validate(&file, mode),
        command => {
            let confirm: &dyn Confirm = if cli.yes { &AssumeYes } else { &TerminalConfirm };
            dispatch(&root, command, confirm, mode)
        }
    }
}

fn cmd_init(root: &Path, force: bool, mode: OutputMode) -> Result<i32> {
    let paths = RoverPaths::new(root);
    ensure_layout(&paths).context("create .rover layout")?;
    if force || !paths.config_path.exists() {
        write_config(&paths.config_path, &RoverConfig::default())
            .context("write .rover/config.toml")?;
    }
    print(
        mode,
        &Message::new(format!("Initialized {}", paths.rover_dir.display())),
    )
}

fn cmd_workflow_validate(file: &Path, mode: OutputMode) -> Result<i32> {
    let workflow =
        workflow::load(file).with_context(|| format!("validate {}", file.display()))?;
    print(
        mode,
        &WorkflowCheck {
            name: workflow.name,
            steps: workflow.steps.len(),
        },
    )
}

fn dispatch(
    root: &Path,
    command: Command,
    confirm: &dyn Confirm,
    mode: OutputMode,
) -> Result<i32> {
    let paths = RoverPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let runner = SystemRunner {
        default_timeout: config.command_timeout(),
        output_limit_bytes: config.output_limit_bytes,
    };
    let ai = AgentCli::new(
        config.ai_command.clone(),
        root,
        config.command_timeout(),
        &runner,
    )
    .context("prepare AI collaborator")?;
    let launcher = DockerLauncher::new(&runner);
    let rover = Orchestrator::new(
        config,
        Services {
            git: Git::new(root, &runner),
            ai: &ai,
            launcher: &launcher,
            confirm,
        },
    )?;

    match command {
        Command::Start {
            description,
            title,
            agent,
            source_branch,
            detach,
        } => {
            let outcome = rover.start(StartRequest {
                description: description.join(" "),
                title,
                agent,
                source_branch,
                detach,
            })?;
            print(mode, &outcome)
        }
        Command::Iterate {
            id,
            instructions,
            detach,
        } => print(mode, &rover.iterate(id, &instructions.join(" "), detach)?),
        Command::List => print(mode, &ListView::from(rover.list()?)),
        Command::Inspect { id, iteration } => print(mode, &rover.inspect(id, iteration)?),
        Command::Diff {
            id,
            path,
            branch,
            name_only,
            tracked_only,
        } => {
            let diff = rover.diff(
                id,
                &DiffRequest {
                    path,
                    branch,
                    name_only,
                    tracked_only,
                },
            )?;
            print(mode, &DiffView { diff })
        }
        Command::Logs {
            id,
            iteration,
            follow,
        } => print(mode, &rover.logs(id, iteration, follow)?),
        Command::Push { id, message } => print(mode, &rover.push(id, message.as_deref())?),
        Command::Merge { id, keep } => {
            let outcome = rover.merge(id, !keep)?;
            print(mode, &outcome)?;
            Ok(match outcome {
                MergeOutcome::Aborted { .. } => exit_codes::MERGE_ABORTED,
                _ => exit_codes::OK,
            })
        }
        Command::Stop { id } => print(mode, &rover.stop(id)?),
        Command::Restart { id, detach } => print(mode, &rover.restart(id, detach)?),
        Command::Reset { id } => {
            if !confirm.confirm(&format!("Reset task {id} and discard its workspace?")) {
                return print(mode, &Message::new("Reset cancelled."));
            }
            print(mode, &rover.reset(id)?)
        }
        Command::Delete { id } => {
            if !confirm.confirm(&format!("Delete task {id} and all of its files?")) {
                return print(mode, &Message::new("Delete cancelled."));
            }
            print(mode, &rover.delete(id)?)
        }
        Command::Init { .. } | Command::Workflow { .. } => Ok(exit_codes::OK),
    }
}

/// Plain status line; JSON renders it as `{"message": ...}`.
#[derive(Serialize)]
struct Message {
    message: String,
}

impl Message {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Human for Message {
    fn human(&self) -> String {
        self.message.clone()
    }
}

fn print<T: Serialize + Human>(mode: OutputMode, value: &T) -> Result<i32> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    emit(mode, value, &mut out).context("write output")?;
    out.flush().context("flush output")?;
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_joins_description_words() {
        let cli = Cli::parse_from(["rover", "start", "add", "retry", "logic", "--detach"]);
        match cli.command {
            Command::Start {
                description,
                detach,
                title,
                ..
            } => {
                assert_eq!(description.join(" "), "add retry logic");
                assert!(detach);
                assert!(title.is_none());
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from(["rover", "merge", "3", "--json", "--yes"]);
        assert!(cli.json);
        assert!(cli.yes);
        assert!(matches!(cli.command, Command::Merge { id: 3, keep: false }));
    }

    #[test]
    fn parse_workflow_validate() {
        let cli = Cli::parse_from(["rover", "workflow", "validate", "flow.yml"]);
        assert!(matches!(
            cli.command,
            Command::Workflow {
                command: WorkflowCommand::Validate { .. }
            }
        ));
    }

    #[test]
    fn not_found_maps_to_its_exit_code() {
        let err = anyhow::Error::new(RoverError::TaskNotFound { id: 9 });
        assert_eq!(exit_code_for(&err), exit_codes::NOT_FOUND);
        let err = anyhow::Error::new(RoverError::Launch("down".to_string()));
        assert_eq!(exit_code_for(&err), exit_codes::FAILED);
    }
}
