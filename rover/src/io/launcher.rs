//! Execution launcher: runs the agent inside a container.
//!
//! The [`Launcher`] trait is the boundary to the container runtime. Rover
//! supplies a name, image, mounts, working directory and command; it never
//! interprets what happens inside the container.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RoverError};
use crate::io::process::{CommandOutput, CommandRunner, RunOptions, StreamEnd, stream_until_exit};

/// Mount point of the task worktree inside the container.
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Mount point of the iteration directory inside the container.
pub const OUTPUT_MOUNT: &str = "/output";

/// Everything the runtime needs to start one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host path mounted at [`WORKSPACE_MOUNT`].
    pub workspace: PathBuf,
    /// Host path mounted at [`OUTPUT_MOUNT`].
    pub output: PathBuf,
    pub workdir: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Container name for a task iteration.
pub fn container_name(task_id: u64, iteration: u32) -> String {
    format!("rover-task-{task_id}-{iteration}")
}

/// Replace `{prompt}` placeholders with the in-container prompt path.
pub fn expand_command(template: &[String], prompt_path: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{prompt}", prompt_path))
        .collect()
}

pub trait Launcher {
    /// Start detached; returns the runtime's container id.
    fn start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Block until the container exits; returns its exit code.
    fn wait(&self, name: &str, timeout: Duration) -> Result<i32>;

    fn stop(&self, name: &str) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    /// One-shot snapshot of the container's logs.
    fn logs(&self, name: &str) -> Result<String>;

    /// Stream logs until the container exits or the operator interrupts.
    fn follow_logs(&self, name: &str) -> Result<StreamEnd>;
}

/// Launcher backed by the `docker` CLI (or a compatible one such as `podman`).
pub struct DockerLauncher<'r> {
    program: String,
    runner: &'r dyn CommandRunner,
}

impl<'r> DockerLauncher<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self::with_program("docker", runner)
    }

    pub fn with_program(program: impl Into<String>, runner: &'r dyn CommandRunner) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn run(&self, args: &[&str], timeout: Option<Duration>) -> Result<CommandOutput> {
        debug!(program = %self.program, args = %args.join(" "), "container runtime");
        let options = RunOptions {
            timeout,
            ..RunOptions::default()
        };
        self.runner
            .run(&self.program, args, &options)
            .map_err(|e| RoverError::Launch(format!("{} unavailable: {e}", self.program)))
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args, None)?;
        if !output.success() {
            return Err(RoverError::Launch(format!(
                "{} {} failed: {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// `docker run` arguments for a spec.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "-v".to_string(),
        format!("{}:{WORKSPACE_MOUNT}", spec.workspace.display()),
        "-v".to_string(),
        format!("{}:{OUTPUT_MOUNT}", spec.output.display()),
        "-w".to_string(),
        spec.workdir.clone(),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

impl Launcher for DockerLauncher<'_> {
    #[instrument(skip_all, fields(name = %spec.name, image = %spec.image))]
    fn start(&self, spec: &ContainerSpec) -> Result<String> {
        let args = run_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_checked(&args)?;
        let id = output.stdout.trim().to_string();
        info!(container_id = %id, "container started");
        Ok(id)
    }

    #[instrument(skip(self))]
    fn wait(&self, name: &str, timeout: Duration) -> Result<i32> {
        let output = self.run(&["wait", name], Some(timeout))?;
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "agent run timed out, stopping container");
            if let Err(err) = self.stop(name) {
                warn!(err = %err, "failed to stop timed-out container");
            }
            return Err(RoverError::Launch(format!(
                "container {name} did not finish within {}s",
                timeout.as_secs()
            )));
        }
        if !output.success() {
            return Err(RoverError::Launch(format!(
                "{} wait {name} failed: {}",
                self.program,
                output.stderr.trim()
            )));
        }
        output.stdout.trim().parse().map_err(|_| {
            RoverError::Launch(format!(
                "unexpected exit code from {} wait: '{}'",
                self.program,
                output.stdout.trim()
            ))
        })
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.run_checked(&["stop", name])?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.run_checked(&["rm", "-f", name])?;
        Ok(())
    }

    fn logs(&self, name: &str) -> Result<String> {
        let output = self.run_checked(&["logs", name])?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    fn follow_logs(&self, name: &str) -> Result<StreamEnd> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["logs", "--follow", name]);
        stream_until_exit(cmd)
            .map_err(|e| RoverError::Launch(format!("{} logs: {e}", self.program)))
    }
}
