//! Shared subprocess execution with concurrent stdout/stderr capture and a
//! timeout, used by the Deterministic Validator's test-command step (spec.md
//! §4.8 step 5) and the Helper Agent's verification-command execution
//! (spec.md §4.11 step 1).

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// The result of running one shell command to completion (or until killed
/// by the timeout).
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `command` via `sh -c` inside `working_dir`, capturing stdout/stderr
/// concurrently with waiting so a full pipe buffer cannot deadlock the
/// child, and killing it if `timeout` elapses.
pub async fn run_shell(command: &str, working_dir: &Path, timeout: Duration) -> Result<ExecResult> {
    let start = Instant::now();

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute command: {command}"))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(timeout, async {
        let (wait_result, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
        (wait_result, stdout, stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => Ok(ExecResult {
            exit_code: status.code(),
            stdout,
            stderr,
            duration_ms: i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX),
            timed_out: false,
        }),
        Ok((Err(e), _, _)) => Err(e).with_context(|| format!("failed to wait on command: {command}")),
        Err(_) => {
            let _ = child.kill().await;
            Ok(ExecResult {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("command timed out after {}s: {command}", timeout.as_secs()),
                duration_ms: i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX),
                timed_out: true,
            })
        }
    }
}
