//! Build-tool subprocess execution.
//!
//! Runs the configured build command inside the working copy, capturing
//! stdout and stderr. Output is drained concurrently with `wait()` into
//! shared buffers, so a timed-out build still yields whatever the tool
//! printed before it was killed — even when grandchild processes keep the
//! pipes open after the kill.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::error::{MendError, Result};

/// Grace period for drain tasks after the child has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Outcome of one build-tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The command line that was executed (display form).
    pub command: String,

    /// Exit code (-1 when the process was terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutcome {
    /// Whether the command exited zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined the way the parser consumes them.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Executes build-tool commands in a project directory.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    project_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl BuildRunner {
    /// Create a runner for the given working copy.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            env: Vec::new(),
        }
    }

    /// Inject environment variables into every spawned command.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// The working copy this runner executes in.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Execute a command with a timeout, capturing combined output.
    ///
    /// A spawn failure of kind `NotFound` maps to [`MendError::CliNotFound`].
    /// Exceeding the timeout kills the process and returns
    /// [`MendError::BuildTimeout`] carrying the output captured so far.
    pub async fn run(&self, command: &[String], timeout_secs: u64) -> Result<CommandOutcome> {
        if command.is_empty() {
            return Err(MendError::InvalidConfig(
                "cannot run an empty command".to_string(),
            ));
        }

        let command_line = command.join(" ");
        info!(command = %command_line, cwd = %self.project_dir.display(), "running build command");
        let start = Instant::now();

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .current_dir(&self.project_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MendError::CliNotFound(command[0].clone())
            } else {
                MendError::Io(e)
            }
        })?;

        let (stdout_buf, stdout_task) = spawn_drain(child.stdout.take());
        let (stderr_buf, stderr_task) = spawn_drain(child.stderr.take());

        let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait())
            .await
        {
            Ok(status) => status?,
            Err(_) => {
                warn!(command = %command_line, timeout_secs, "build command timed out, killing");
                let _ = child.kill().await;
                // Grandchildren may keep the pipes open; give the drain
                // tasks a moment, then take whatever was captured.
                let _ = tokio::time::timeout(DRAIN_GRACE, stdout_task).await;
                let _ = tokio::time::timeout(DRAIN_GRACE, stderr_task).await;
                let partial_output =
                    format!("{}\n{}", snapshot(&stdout_buf), snapshot(&stderr_buf));
                return Err(MendError::BuildTimeout {
                    timeout_secs,
                    partial_output,
                });
            }
        };

        // Child exited; drain to EOF. A short deadline guards against
        // lingering grandchildren holding the pipes open.
        let _ = tokio::time::timeout(Duration::from_secs(5), stdout_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), stderr_task).await;

        let stdout = snapshot(&stdout_buf);
        let stderr = snapshot(&stderr_buf);
        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        debug!(command = %command_line, exit_code, duration_ms, "build command finished");

        Ok(CommandOutcome {
            command: command_line,
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }
}

/// Drain a pipe into a shared buffer that stays readable mid-flight.
fn spawn_drain<R>(reader: Option<R>) -> (Arc<Mutex<Vec<u8>>>, tokio::task::JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let task_buf = buf.clone();
    let task = tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut guard) = task_buf.lock() {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buf, task)
}

fn snapshot(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(guard) => String::from_utf8_lossy(&guard).to_string(),
        Err(_) => String::new(),
    }
}
