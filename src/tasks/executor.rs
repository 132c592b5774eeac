//! Bounded task execution.
//!
//! Every task runs inside two ceilings: a wall clock and an output cap.
//! Blowing either one kills the subprocess and produces a normal `failed`
//! or truncated result — no execution path propagates an error.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::tasks::model::{Task, TaskAction, TaskResult, TaskStatus};

/// Maximum merged output captured from a shell task (characters).
const MAX_SHELL_OUTPUT: usize = 50_000;

/// Diagnostic slices kept from a script task's streams.
const SCRIPT_STDOUT_LIMIT: usize = 20_000;
const SCRIPT_STDERR_LIMIT: usize = 5_000;

/// Wall-clock ceiling for a single task.
const TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Appended when shell output is cut at the ceiling.
const TRUNCATION_MARKER: &str = "\n... [truncated] ...";

/// Runs one task to completion inside bounded resource limits.
#[derive(Debug, Clone)]
pub struct Executor {
    /// Default working directory for tasks that don't name one.
    home: PathBuf,
    timeout: Duration,
    output_limit: usize,
    interpreter: String,
}

impl Executor {
    pub fn new() -> Self {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self {
            home,
            timeout: TASK_TIMEOUT,
            output_limit: MAX_SHELL_OUTPUT,
            interpreter: "python3".to_string(),
        }
    }

    /// Set the default working directory.
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    /// Set the wall-clock ceiling.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the shell output ceiling (characters).
    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    /// Set the script interpreter binary.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Execute one task. Always returns a result; local failures (a command
    /// that cannot spawn, a timeout, an output overflow) become `failed`
    /// results carrying the error.
    pub async fn execute(&self, task: &Task) -> TaskResult {
        info!(task_id = %task.id, "Executing: {}", preview(&task.description));

        match &task.action {
            TaskAction::Shell { command, cwd } => self.run_shell(command, cwd.as_deref()).await,
            TaskAction::Script { script, cwd } => self.run_script(script, cwd.as_deref()).await,
            TaskAction::Other { kind } => {
                debug!(task_id = %task.id, kind, "Unrecognized action kind, acknowledging");
                TaskResult::completed(json!({
                    "message": format!("Acknowledged task type: {kind}"),
                    "description": task.description,
                }))
            }
        }
    }

    /// Run a command line under a shell, merging stdout and stderr.
    async fn run_shell(&self, command: &str, cwd: Option<&str>) -> TaskResult {
        let workdir = self.resolve_cwd(cwd);

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return TaskResult::failed(format!("Failed to spawn command: {e}")),
        };

        let bounded = tokio::time::timeout(self.timeout, async {
            let (output, truncated) = capture_merged(&mut child, self.output_limit).await;
            if truncated {
                let _ = child.kill().await;
            }
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            };
            (output, truncated, code)
        })
        .await;

        match bounded {
            Ok((mut output, truncated, code)) => {
                if truncated {
                    output.push_str(TRUNCATION_MARKER);
                }
                let data = json!({ "exit_code": code, "output": output });
                if code == 0 {
                    TaskResult::completed(data)
                } else {
                    TaskResult {
                        status: TaskStatus::Failed,
                        data,
                    }
                }
            }
            Err(_) => {
                let _ = child.kill().await;
                TaskResult::failed(format!("Timed out after {}s", self.timeout.as_secs()))
            }
        }
    }

    /// Run a script body via the interpreter, no shell.
    async fn run_script(&self, script: &str, cwd: Option<&str>) -> TaskResult {
        if script.is_empty() {
            return TaskResult::failed("No script provided");
        }
        let workdir = self.resolve_cwd(cwd);

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c")
            .arg(script)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The timeout path drops the future owning the child; the drop
            // must kill the interpreter rather than leak it.
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return TaskResult::failed(format!("Failed to spawn interpreter: {e}")),
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let code = out.status.code().unwrap_or(-1);
                let data = json!({
                    "exit_code": code,
                    "stdout": truncate_chars(
                        &String::from_utf8_lossy(&out.stdout),
                        SCRIPT_STDOUT_LIMIT
                    ),
                    "stderr": truncate_chars(
                        &String::from_utf8_lossy(&out.stderr),
                        SCRIPT_STDERR_LIMIT
                    ),
                });
                if code == 0 {
                    TaskResult::completed(data)
                } else {
                    TaskResult {
                        status: TaskStatus::Failed,
                        data,
                    }
                }
            }
            Ok(Err(e)) => TaskResult::failed(format!("Script execution failed: {e}")),
            Err(_) => TaskResult::failed(format!("Timed out after {}s", self.timeout.as_secs())),
        }
    }

    fn resolve_cwd(&self, cwd: Option<&str>) -> PathBuf {
        cwd.map(PathBuf::from).unwrap_or_else(|| self.home.clone())
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Read both pipes into one buffer until EOF on both or the character
/// ceiling is crossed. Returns the captured output and whether it was cut.
async fn capture_merged(child: &mut Child, limit: usize) -> (String, bool) {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut output = String::new();
    let mut char_count = 0usize;
    let mut out_buf = vec![0u8; 4096];
    let mut err_buf = vec![0u8; 4096];

    while stdout.is_some() || stderr.is_some() {
        let out_open = stdout.is_some();
        let err_open = stderr.is_some();

        let chunk = tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf), if out_open => {
                match n {
                    Some(n) => Some(String::from_utf8_lossy(&out_buf[..n]).into_owned()),
                    None => {
                        stdout = None;
                        None
                    }
                }
            }
            n = read_chunk(&mut stderr, &mut err_buf), if err_open => {
                match n {
                    Some(n) => Some(String::from_utf8_lossy(&err_buf[..n]).into_owned()),
                    None => {
                        stderr = None;
                        None
                    }
                }
            }
        };

        if let Some(chunk) = chunk {
            char_count += chunk.chars().count();
            output.push_str(&chunk);
            if char_count > limit {
                return (output, true);
            }
        }
    }

    (output, false)
}

/// Read one chunk from an optional pipe; `None` on EOF or read error.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> Option<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe.as_mut() {
        Some(reader) => match reader.read(buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(n),
        },
        None => std::future::pending().await,
    }
}

/// Keep at most `limit` characters.
fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// Short description slice for log lines.
fn preview(s: &str) -> String {
    if s.chars().count() <= 60 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(60).collect::<String>())
    }
}
