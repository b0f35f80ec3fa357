//! Shared types for the Provider Dispatcher (spec.md §4.5, §6 "Provider CLI
//! contract").

use std::path::PathBuf;

/// Input to a single provider invocation (spec.md §4.5: "Accepts `(prompt,
/// working_directory, agent_mode?, session_id?, feature_id?, task_id?)`").
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub prompt: String,
    pub working_directory: PathBuf,
    pub agent_mode: Option<String>,
    pub resume_session_id: Option<String>,
    pub feature_id: Option<String>,
    pub task_id: Option<String>,
}

/// Parsed token usage from a provider's structured output (spec.md §6:
/// "usage metadata (input/prompt/cached/total tokens, session id)").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: i64,
    pub cached_tokens: i64,
    pub total_tokens: i64,
}

/// Result of one provider invocation (spec.md §4.5 step 4).
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// The outermost JSON object extracted from stdout, or empty if none
    /// could be found (spec.md §6: "mixed text is tolerated via outermost-
    /// brace extraction").
    pub raw_output: String,
    pub session_id: Option<String>,
    pub usage: Usage,
    pub provider: String,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
