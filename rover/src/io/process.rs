//! Child process execution behind the [`CommandRunner`] capability.
//!
//! Git and container adapters only ever talk to a `CommandRunner`, so tests
//! can substitute a scripted runner. [`SystemRunner`] is the real thing: it
//! captures stdout/stderr concurrently (no pipe deadlocks), bounds the amount
//! kept in memory, and kills children that exceed their timeout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Self::default()
        }
    }
}

/// Captured outcome of a finished child process.
///
/// A non-zero exit is data, not an error; callers decide what it means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Stdout exceeded the runner's output limit and was cut short.
    pub stdout_truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Capability to run an external program to completion.
///
/// Only spawn/wait failures are errors; exit status is reported in the output.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions)
    -> std::io::Result<CommandOutput>;
}

/// Runs real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    pub default_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            output_limit_bytes: 1_000_000,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        options: &RunOptions,
    ) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        run_command_with_timeout(
            cmd,
            options.stdin.as_deref(),
            options.timeout.unwrap_or(self.default_timeout),
            self.output_limit_bytes,
        )
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> std::io::Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().inspect_err(|e| {
        error!(err = %e, "failed to spawn command");
    })?;

    if let Some(input) = stdin
        && let Some(mut child_stdin) = child.stdin.take()
    {
        child_stdin.write_all(input)?;
    }

    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill()?;
            child.wait()?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle)?;
    let (stderr, stderr_truncated) = join_output(stderr_handle)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
        stdout_truncated: stdout_truncated > 0,
    })
}

/// How a streamed child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Exited(Option<i32>),
    /// The operator pressed Ctrl-C; the child received the same SIGINT.
    Interrupted,
}

/// Run a command with stdout/stderr inherited until it exits.
///
/// While the child runs, Ctrl-C only sets a flag in this process; the child
/// shares the terminal's process group, receives the same SIGINT and exits, so
/// the caller can report the interrupt and exit cleanly.
#[instrument(skip_all)]
pub fn stream_until_exit(mut cmd: Command) -> std::io::Result<StreamEnd> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    debug!(program = ?cmd.get_program(), "streaming child process");
    let mut child = cmd.spawn()?;

    let guard = interrupt::Streaming::begin();
    let status = child.wait();
    let interrupted = guard.interrupted();
    drop(guard);
    let status = status?;

    if interrupted || interrupt::killed_by_sigint(&status) || status.code() == Some(130) {
        debug!("streamed child interrupted");
        return Ok(StreamEnd::Interrupted);
    }
    Ok(StreamEnd::Exited(status.code()))
}

mod interrupt {
    use std::process::ExitStatus;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tracing::warn;

    /// Exit status of a process ended by Ctrl-C.
    const INTERRUPTED_EXIT: i32 = 130;

    static STREAMING: AtomicBool = AtomicBool::new(false);
    static INTERRUPTED: AtomicBool = AtomicBool::new(false);
    static HANDLER: OnceLock<bool> = OnceLock::new();

    /// Installs the process-wide Ctrl-C handler once.
    ///
    /// Outside a stream the handler exits like the default disposition would.
    fn install() -> bool {
        *HANDLER.get_or_init(|| {
            let installed = ctrlc::set_handler(|| {
                if STREAMING.load(Ordering::SeqCst) {
                    INTERRUPTED.store(true, Ordering::SeqCst);
                } else {
                    std::process::exit(INTERRUPTED_EXIT);
                }
            });
            match installed {
                Ok(()) => true,
                Err(err) => {
                    warn!(err = %err, "could not install Ctrl-C handler while streaming");
                    false
                }
            }
        })
    }

    /// Marks the process as streaming until dropped.
    pub struct Streaming(());

    impl Streaming {
        pub fn begin() -> Self {
            install();
            INTERRUPTED.store(false, Ordering::SeqCst);
            STREAMING.store(true, Ordering::SeqCst);
            Self(())
        }

        pub fn interrupted(&self) -> bool {
            INTERRUPTED.load(Ordering::SeqCst)
        }
    }

    impl Drop for Streaming {
        fn drop(&mut self) {
            STREAMING.store(false, Ordering::SeqCst);
        }
    }

    #[cfg(unix)]
    pub fn killed_by_sigint(status: &ExitStatus) -> bool {
        use std::os::unix::process::ExitStatusExt;

        const SIGINT: i32 = 2;
        status.signal() == Some(SIGINT)
    }

    #[cfg(not(unix))]
    pub fn killed_by_sigint(_status: &ExitStatus) -> bool {
        false
    }
}

fn missing_pipe(name: &str) -> std::io::Error {
    std::io::Error::other(format!("{name} was not piped"))
}

fn join_output(
    handle: thread::JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
) -> std::io::Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::other("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
