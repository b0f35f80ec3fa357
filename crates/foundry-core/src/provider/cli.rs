//! Subprocess-spawning provider adapter.
//!
//! Every provider CLI is invoked the same way: spawn with `prompt` piped on
//! stdin, read stdout/stderr concurrently (to avoid the deadlock a full
//! pipe buffer would cause), enforce a per-call timeout, then pull the
//! outermost JSON object out of stdout (spec.md §6: "mixed text is
//! tolerated via outermost-brace extraction"). This mirrors the base
//! crate's invariant-command runner almost verbatim, generalized from a
//! pass/fail exit-code check to a structured-output dispatch.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{DispatchOutcome, DispatchRequest, Provider, Usage};
use crate::error::DispatchError;

/// Static configuration for one CLI-backed provider.
#[derive(Debug, Clone)]
pub struct CliProviderConfig {
    pub name: String,
    pub binary_path: String,
    /// Extra argv entries inserted before the resume/agent-mode flags.
    pub extra_args: Vec<String>,
    /// Flag used to resume a session, e.g. `--resume`. `None` if the
    /// provider has no resume concept (always starts fresh).
    pub resume_flag: Option<String>,
    /// Flag used to pass the agent mode hint, e.g. `--mode`.
    pub agent_mode_flag: Option<String>,
    pub timeout: Duration,
}

impl CliProviderConfig {
    pub fn new(name: impl Into<String>, binary_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            resume_flag: Some("--resume".to_string()),
            agent_mode_flag: Some("--mode".to_string()),
            // Suggested 30-minute ceiling for main dispatch (spec.md §5).
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

pub struct CliProvider {
    config: CliProviderConfig,
}

impl CliProvider {
    pub fn new(config: CliProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Provider for CliProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        dispatch_cli(&self.config, request).await
    }
}

async fn dispatch_cli(
    config: &CliProviderConfig,
    request: &DispatchRequest,
) -> Result<DispatchOutcome, DispatchError> {
    let mut cmd = Command::new(&config.binary_path);
    cmd.args(&config.extra_args);
    cmd.current_dir(&request.working_directory);

    if let (Some(flag), Some(session_id)) = (&config.resume_flag, &request.resume_session_id) {
        cmd.arg(flag).arg(session_id);
    }
    if let (Some(flag), Some(mode)) = (&config.agent_mode_flag, &request.agent_mode) {
        cmd.arg(flag).arg(mode);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| DispatchError::Spawn {
        provider: config.name.clone(),
        source,
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(request.prompt.as_bytes()).await;
        drop(stdin);
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let outcome = tokio::time::timeout(config.timeout, async {
        let (wait_result, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
        (wait_result, stdout, stderr)
    })
    .await;

    let (status, stdout, stderr) = match outcome {
        Ok((Ok(status), stdout, stderr)) => (status, stdout, stderr),
        Ok((Err(_), _, _)) | Err(_) => {
            let _ = child.kill().await;
            return Err(DispatchError::Timeout {
                provider: config.name.clone(),
                timeout_secs: config.timeout.as_secs(),
            });
        }
    };

    let raw_output = extract_outermost_json(&stdout).unwrap_or_default();
    let parsed: Option<serde_json::Value> = if raw_output.is_empty() {
        None
    } else {
        serde_json::from_str(&raw_output).ok()
    };

    let session_id = parsed
        .as_ref()
        .and_then(|v| v.get("session_id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let usage = parsed
        .as_ref()
        .and_then(|v| v.get("usage"))
        .map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            cached_tokens: u.get("cached_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            total_tokens: u.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(DispatchOutcome {
        stdout,
        stderr,
        exit_code: status.code(),
        raw_output,
        session_id,
        usage,
        provider: config.name.clone(),
    })
}

/// Extract the first top-level `{...}` object from `text`, tolerating
/// leading/trailing prose and an optional markdown code fence (spec.md
/// §4.8 "Parses the agent's JSON from raw output (markdown-fenced or bare
/// braces)", §6 "mixed text is tolerated via outermost-brace extraction").
pub fn extract_outermost_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DispatchRequest;

    #[test]
    fn extracts_bare_json() {
        let text = r#"{"status":"completed","files_created":[]}"#;
        assert_eq!(extract_outermost_json(text).unwrap(), text);
    }

    #[test]
    fn extracts_json_from_markdown_fence() {
        let text = "Here is my answer:\n```json\n{\"status\":\"completed\"}\n```\nThanks.";
        assert_eq!(
            extract_outermost_json(text).unwrap(),
            r#"{"status":"completed"}"#
        );
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = r#"{"summary":"uses {curly} braces","status":"completed"}"#;
        let extracted = extract_outermost_json(text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&extracted).unwrap();
        assert_eq!(parsed["status"], "completed");
    }

    #[test]
    fn returns_none_when_no_braces() {
        assert!(extract_outermost_json("no json here").is_none());
    }

    #[tokio::test]
    async fn dispatch_captures_stdout_session_and_usage() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake_provider.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho '{\"status\":\"completed\",\"session_id\":\"sess-1\",\"usage\":{\"input_tokens\":10,\"cached_tokens\":2,\"total_tokens\":12}}'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = CliProviderConfig::new("fake", script.to_str().unwrap());
        let provider = CliProvider::new(config);
        let request = DispatchRequest {
            prompt: "do the thing".to_string(),
            working_directory: tmp.path().to_path_buf(),
            agent_mode: None,
            resume_session_id: None,
            feature_id: None,
            task_id: None,
        };

        let outcome = provider.dispatch(&request).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.session_id.as_deref(), Some("sess-1"));
        assert_eq!(outcome.usage.total_tokens, 12);
    }

    #[tokio::test]
    async fn dispatch_times_out_on_slow_process() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("slow_provider.sh");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nsleep 5\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut config = CliProviderConfig::new("slow", script.to_str().unwrap());
        config.timeout = std::time::Duration::from_millis(100);
        let provider = CliProvider::new(config);
        let request = DispatchRequest {
            prompt: "do the thing".to_string(),
            working_directory: tmp.path().to_path_buf(),
            agent_mode: None,
            resume_session_id: None,
            feature_id: None,
            task_id: None,
        };

        let result = provider.dispatch(&request).await;
        assert!(matches!(result, Err(DispatchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn dispatch_reports_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("failing_provider.sh");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nexit 2\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = CliProviderConfig::new("failing", script.to_str().unwrap());
        let provider = CliProvider::new(config);
        let request = DispatchRequest {
            prompt: "do the thing".to_string(),
            working_directory: tmp.path().to_path_buf(),
            agent_mode: None,
            resume_session_id: None,
            feature_id: None,
            task_id: None,
        };

        let outcome = provider.dispatch(&request).await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(2));
    }

    #[tokio::test]
    async fn dispatch_passes_resume_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("echo_args.sh");
        std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\necho \"{\\\"status\\\":\\\"completed\\\",\\\"session_id\\\":\\\"$2\\\"}\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = CliProviderConfig::new("echoer", script.to_str().unwrap());
        let provider = CliProvider::new(config);
        let request = DispatchRequest {
            prompt: "do the thing".to_string(),
            working_directory: tmp.path().to_path_buf(),
            agent_mode: None,
            resume_session_id: Some("resume-me".to_string()),
            feature_id: None,
            task_id: None,
        };

        let outcome = provider.dispatch(&request).await.unwrap();
        assert_eq!(outcome.session_id.as_deref(), Some("resume-me"));
    }
}
