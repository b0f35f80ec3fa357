//! Helper Agent pipeline and Interrogation (spec.md §4.11 steps 1-2).
//!
//! Both dispatch to the `helper:<feature_id>` session namespace (spec.md
//! §4.7) rather than the task's own session, so a helper's mistakes don't
//! pollute the coding agent's context.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::exec;
use crate::prompt::is_sandbox_safe;

const VERIFICATION_COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Safety cap on how many shell commands one helper-agent response may
/// propose, distinct from the file-scan caps in `validator::checks`.
const MAX_VERIFICATION_COMMANDS: usize = 10;

/// Build the verification prompt sent to the helper session (spec.md §4.11
/// step 1: "assemble a verification prompt containing the failed/uncertain
/// criteria, the agent's prior response (first 5000 chars), and the working
/// directory").
pub fn build_verification_prompt(criteria: &[String], prior_response: &str, working_directory: &str) -> String {
    let truncated: String = prior_response.chars().take(5000).collect();
    format!(
        "Verify the following criteria against the sandbox at {working_directory}.\n\nUncertain/failed criteria:\n{}\n\nThe agent's prior response was:\n{truncated}\n\nRespond with exactly one JSON object: {{ commands: string[] }}, each a shell command (run from {working_directory}) whose exit code 0 confirms one criterion.",
        criteria.iter().map(|c| format!("- {c}")).collect::<Vec<_>>().join("\n"),
    )
}

/// Parse the helper's proposed verification commands out of its response
/// JSON (spec.md §4.11 step 1: "Parse the response into verification
/// commands").
pub fn parse_helper_commands(raw_output: &str) -> Result<Vec<String>, String> {
    let candidate = crate::provider::cli::extract_outermost_json(raw_output)
        .ok_or_else(|| "no JSON object found in helper response".to_string())?;
    let parsed: serde_json::Value =
        serde_json::from_str(&candidate).map_err(|e| format!("failed to parse helper JSON: {e}"))?;
    let commands = parsed
        .get("commands")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "helper response missing commands[]".to_string())?;
    Ok(commands.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

/// Execute each proposed verification command with a per-command timeout,
/// capping the total number executed (spec.md §4.11 step 1: "Execute each
/// command with safety caps; on all commands passing, mark the task
/// valid"). A helper proposing zero commands is uncertain, not confirmed
/// (spec.md §8 B4: "falls through to retry"), so it returns `false` rather
/// than vacuously succeeding.
pub async fn run_verification_commands(commands: &[String], sandbox_root: &Path) -> bool {
    if commands.is_empty() {
        warn!("helper proposed zero verification commands, treating as unconfirmed");
        return false;
    }
    if commands.len() > MAX_VERIFICATION_COMMANDS {
        warn!(count = commands.len(), cap = MAX_VERIFICATION_COMMANDS, "helper proposed too many commands, rejecting");
        return false;
    }
    for command in commands {
        let result = match exec::run_shell(command, sandbox_root, VERIFICATION_COMMAND_TIMEOUT).await {
            Ok(r) => r,
            Err(e) => {
                warn!(command, error = %e, "verification command failed to execute");
                return false;
            }
        };
        if !result.succeeded() {
            warn!(command, stderr = %result.stderr, "verification command did not pass");
            return false;
        }
    }
    true
}

/// `{results: {criterion: {status, file_paths[], evidence_snippet?}}}`
/// (spec.md §4.11 step 2).
#[derive(Debug, Clone, Deserialize)]
pub struct InterrogationResponse {
    pub results: std::collections::HashMap<String, CriterionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriterionStatus {
    Complete,
    Incomplete,
    NotStarted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CriterionResult {
    pub status: CriterionStatus,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub evidence_snippet: Option<String>,
}

/// Outcome of one interrogation round (spec.md §4.11 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterrogationOutcome {
    /// Every criterion confirmed `COMPLETE` with paths that exist on disk.
    AllConfirmed,
    /// At least one criterion explicitly `NOT_STARTED` — stop early rather
    /// than spending further rounds (spec.md: "Early exit on any explicit
    /// 'not implemented'").
    EarlyExitNotStarted(Vec<String>),
    /// Some criteria remain `INCOMPLETE` (or claimed paths don't exist).
    StillIncomplete(Vec<String>),
}

/// Parse and evaluate one interrogation round's response (spec.md §4.11
/// step 2: "Validate claimed paths on disk").
pub fn evaluate_interrogation_round(raw_output: &str, sandbox_root: &Path) -> Result<InterrogationOutcome, String> {
    let candidate = crate::provider::cli::extract_outermost_json(raw_output)
        .ok_or_else(|| "no JSON object found in interrogation response".to_string())?;
    let parsed: InterrogationResponse =
        serde_json::from_str(&candidate).map_err(|e| format!("failed to parse interrogation response: {e}"))?;

    let mut not_started = Vec::new();
    let mut incomplete = Vec::new();

    for (criterion, result) in &parsed.results {
        match result.status {
            CriterionStatus::NotStarted => not_started.push(criterion.clone()),
            CriterionStatus::Incomplete => incomplete.push(criterion.clone()),
            CriterionStatus::Complete => {
                let paths_valid = result
                    .file_paths
                    .iter()
                    .all(|p| is_sandbox_safe(p) && sandbox_root.join(p).exists());
                if !paths_valid {
                    incomplete.push(criterion.clone());
                }
            }
        }
    }

    if !not_started.is_empty() {
        return Ok(InterrogationOutcome::EarlyExitNotStarted(not_started));
    }
    if !incomplete.is_empty() {
        return Ok(InterrogationOutcome::StillIncomplete(incomplete));
    }
    Ok(InterrogationOutcome::AllConfirmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_from_response() {
        let raw = r#"```json
{"commands": ["grep -q handle_login src/lib.rs", "test -f src/lib.rs"]}
```"#;
        let commands = parse_helper_commands(raw).unwrap();
        assert_eq!(commands.len(), 2);
    }

    #[tokio::test]
    async fn all_passing_commands_mark_valid() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec!["true".to_string(), "true".to_string()];
        assert!(run_verification_commands(&commands, dir.path()).await);
    }

    #[tokio::test]
    async fn one_failing_command_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec!["true".to_string(), "false".to_string()];
        assert!(!run_verification_commands(&commands, dir.path()).await);
    }

    #[tokio::test]
    async fn zero_commands_is_not_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!run_verification_commands(&[], dir.path()).await);
    }

    #[tokio::test]
    async fn too_many_commands_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let commands: Vec<String> = (0..20).map(|_| "true".to_string()).collect();
        assert!(!run_verification_commands(&commands, dir.path()).await);
    }

    #[test]
    fn interrogation_all_complete_with_valid_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), b"fn main() {}").unwrap();
        let raw = r#"{"results": {"has a main fn": {"status": "COMPLETE", "file_paths": ["a.rs"]}}}"#;
        let outcome = evaluate_interrogation_round(raw, dir.path()).unwrap();
        assert_eq!(outcome, InterrogationOutcome::AllConfirmed);
    }

    #[test]
    fn interrogation_complete_with_missing_path_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let raw = r#"{"results": {"c1": {"status": "COMPLETE", "file_paths": ["missing.rs"]}}}"#;
        let outcome = evaluate_interrogation_round(raw, dir.path()).unwrap();
        assert!(matches!(outcome, InterrogationOutcome::StillIncomplete(_)));
    }

    #[test]
    fn interrogation_not_started_exits_early() {
        let dir = tempfile::tempdir().unwrap();
        let raw = r#"{"results": {"c1": {"status": "NOT_STARTED", "file_paths": []}}}"#;
        let outcome = evaluate_interrogation_round(raw, dir.path()).unwrap();
        assert!(matches!(outcome, InterrogationOutcome::EarlyExitNotStarted(_)));
    }
}
