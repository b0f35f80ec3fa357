//! Closed error taxonomies the Control Loop pattern-matches on.
//!
//! Everything else in this crate returns `anyhow::Result` with `.context(...)`
//! attached at the call site, matching the base crate's query-layer style.
//! These three enums exist because the loop must *branch* on the variant,
//! not just log and bubble it.

use std::fmt;

/// Why the Control Loop stopped dispatching for a project (spec.md §7).
///
/// This is the one error type that crosses the State Store boundary: it is
/// persisted as `projects.status = 'halted'` plus the `reason` field on the
/// terminal audit entry, so it alone implements `Display`/`Serialize` in
/// addition to `std::error::Error`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    #[error("resource exhausted: retry scheduled for {retry_at}")]
    ResourceExhausted { retry_at: chrono::DateTime<chrono::Utc> },

    #[error("task {task_id} blocked: {reason}")]
    Blocked { task_id: String, reason: String },

    #[error("output format invalid: {detail}")]
    OutputFormatInvalid { detail: String },

    #[error("provider circuit broken: all providers unavailable")]
    ProviderCircuitBroken,

    #[error("task list exhausted, goal incomplete: {missing:?}")]
    TaskListExhaustedGoalIncomplete { missing: Vec<String> },

    #[error("missing required state field: {field}")]
    MissingStateField { field: String },

    #[error("state persist failure: {detail}")]
    StatePersistFailure { detail: String },
}

impl HaltReason {
    /// Short machine-stable tag, used as the audit log's `reason` prefix.
    pub fn code(&self) -> &'static str {
        match self {
            HaltReason::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            HaltReason::Blocked { .. } => "BLOCKED",
            HaltReason::OutputFormatInvalid { .. } => "OUTPUT_FORMAT_INVALID",
            HaltReason::ProviderCircuitBroken => "PROVIDER_CIRCUIT_BROKEN",
            HaltReason::TaskListExhaustedGoalIncomplete { .. } => {
                "TASK_LIST_EXHAUSTED_GOAL_INCOMPLETE"
            }
            HaltReason::MissingStateField { .. } => "MISSING_STATE_FIELD",
            HaltReason::StatePersistFailure { .. } => "STATE_PERSIST_FAILURE",
        }
    }
}

/// Dispatch-layer errors (spec.md §7 "Dispatch errors").
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("provider {provider} exited with status {exit_code:?}")]
    NonZeroExit { provider: String, exit_code: Option<i32> },

    #[error("provider {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("failed to parse structured output from provider {provider}: {detail}")]
    ParseFailure { provider: String, detail: String },

    #[error("no provider available: every breaker is open")]
    AllProvidersUnavailable,

    #[error("failed to spawn provider {provider}: {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },
}

impl fmt::Display for DispatchErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchErrorClass::RateLimit => "rate_limit",
            DispatchErrorClass::Quota => "quota",
            DispatchErrorClass::Auth => "auth",
            DispatchErrorClass::ExecFailure => "exec_failure",
        };
        write!(f, "{s}")
    }
}

/// Classification of a dispatch failure used by the Circuit Breaker to
/// decide whether to trip (spec.md §4.4: "rate-limit / quota / auth /
/// repeated exec failure signals").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorClass {
    RateLimit,
    Quota,
    Auth,
    ExecFailure,
}

/// Enqueue-time validation errors (spec.md §7 "Schema errors" / "Dependency
/// errors"). The whole task file is rejected on any of these.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("task {task_id:?}: unknown top-level key {key:?}")]
    UnknownKey { task_id: String, key: String },

    #[error("task missing required field task_id")]
    MissingTaskId,

    #[error("task {task_id}: invalid task_type {task_type:?}")]
    InvalidTaskType { task_id: String, task_type: String },

    #[error("task {task_id}: depends_on target {target:?} does not exist")]
    MissingDependencyTarget { task_id: String, target: String },

    #[error("circular dependency: {0}")]
    CircularDependency(String),

    #[error("task_id {0:?} already exists in this project")]
    DuplicateTaskId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_reason_code_is_stable() {
        assert_eq!(HaltReason::ProviderCircuitBroken.code(), "PROVIDER_CIRCUIT_BROKEN");
        assert_eq!(
            HaltReason::MissingStateField { field: "goal".into() }.code(),
            "MISSING_STATE_FIELD"
        );
    }

    #[test]
    fn halt_reason_serializes_with_kind_tag() {
        let reason = HaltReason::Blocked {
            task_id: "t1".into(),
            reason: "no such file".into(),
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "BLOCKED");
        assert_eq!(json["task_id"], "t1");
    }
}
