//! Process runner - spawns step commands under an explicit environment

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error types for running a command
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "timed out after {} seconds",
        .timeout.as_secs() + u64::from(.timeout.subsec_nanos() > 0)
    )]
    TimedOut { timeout: Duration, output: String },

    #[error("cancelled")]
    Cancelled { output: String },

    #[error("I/O error while waiting for '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    /// Output captured before the command stopped
    pub fn output(&self) -> &str {
        match self {
            RunnerError::TimedOut { output, .. } | RunnerError::Cancelled { output } => output,
            _ => "",
        }
    }
}

/// A command to run
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,

    /// The complete environment of the child; nothing else is inherited
    pub env: BTreeMap<String, String>,

    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Command line for display
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout and stderr for the step log
    pub fn combined(&self) -> String {
        combine(&self.stdout, &self.stderr)
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => {
            let separator = if stdout.ends_with('\n') { "" } else { "\n" };
            format!("{}{}{}", stdout, separator, stderr)
        }
    }
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, killing it on timeout or cancellation
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, RunnerError>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, RunnerError> {
        (**self).run(request, cancel).await
    }
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

type Buffer = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R>(reader: Option<R>) -> (Buffer, Option<JoinHandle<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer: Buffer = Arc::new(Mutex::new(Vec::new()));
    let handle = reader.map(|mut reader| {
        let buffer = buffer.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        })
    });
    (buffer, handle)
}

fn drain(buffer: &Buffer) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

enum Stop {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Kill the command and everything it started in its process group
async fn kill_tree(child: &mut Child, pid: Option<u32>, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: killpg only sends a signal; the group was created at spawn
        if unsafe { libc::killpg(pid, libc::SIGKILL) } != 0 {
            debug!("Process group of {} already gone", program);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!("Failed to kill {}: {}", program, e);
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, RunnerError> {
        debug!("Spawning {} in {}", request.display(), request.working_dir.display());
        let start = Instant::now();
        let started = tokio::time::Instant::now();

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .env_clear()
            .envs(&request.env)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: request.program.clone(),
            source,
        })?;
        let pid = child.id();

        let (stdout, stdout_task) = spawn_reader(child.stdout.take());
        let (stderr, stderr_task) = spawn_reader(child.stderr.take());
        let mut readers: Vec<JoinHandle<()>> =
            [stdout_task, stderr_task].into_iter().flatten().collect();

        let expired = async {
            match request.timeout {
                Some(timeout) => {
                    tokio::time::sleep_until(started + timeout).await;
                    timeout
                }
                None => std::future::pending::<Duration>().await,
            }
        };
        tokio::pin!(expired);

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            timeout = &mut expired => Stop::TimedOut(timeout),
            _ = cancel.cancelled() => Stop::Cancelled,
        };

        // Background jobs inherit the pipes and can hold them open after the
        // command itself exits, so the drain is still bound by timeout and cancel
        let stop = match stop {
            Stop::Exited(status) => {
                let drained = async {
                    for task in readers.iter_mut() {
                        let _ = task.await;
                    }
                };
                tokio::select! {
                    _ = drained => Stop::Exited(status),
                    timeout = &mut expired => Stop::TimedOut(timeout),
                    _ = cancel.cancelled() => Stop::Cancelled,
                }
            }
            stop => stop,
        };

        match stop {
            Stop::Exited(status) => {
                let status = status.map_err(|source| RunnerError::Io {
                    program: request.program.clone(),
                    source,
                })?;

                let output = CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: drain(&stdout),
                    stderr: drain(&stderr),
                    duration: start.elapsed(),
                };
                debug!(
                    "{} exited with code {} after {:?}",
                    request.program, output.exit_code, output.duration
                );
                Ok(output)
            }
            stop => {
                kill_tree(&mut child, pid, &request.program).await;
                // Keep what was read so far
                for task in &readers {
                    task.abort();
                }
                let output = combine(&drain(&stdout), &drain(&stderr));
                match stop {
                    Stop::TimedOut(timeout) => {
                        warn!("{} timed out after {:?}", request.program, timeout);
                        Err(RunnerError::TimedOut { timeout, output })
                    }
                    _ => {
                        debug!("{} cancelled", request.program);
                        Err(RunnerError::Cancelled { output })
                    }
                }
            }
        }
    }
}
