//! Row types and closed enums for the Foundry state store.
//!
//! Every enum here maps to a Postgres `text` column via `sqlx::Type` with
//! `rename_all = "snake_case"`, the same convention the rest of this crate
//! uses for every closed-set field pulled out of `spec.md` (task type,
//! queue location, confidence level, circuit state, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Closed enums (spec.md §3, §4.4, §4.6, §4.8)
// ---------------------------------------------------------------------------

/// `supervisor.status` (spec.md §3 SupervisorState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SupervisorStatus {
    Running,
    Halted,
    Blocked,
    Completed,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorStatus::Running => "running",
            SupervisorStatus::Halted => "halted",
            SupervisorStatus::Blocked => "blocked",
            SupervisorStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Closed `task_type` set (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskType {
    Coding,
    Behavioral,
    Verification,
    Testing,
    Configuration,
    Documentation,
    Refactoring,
    Implementation,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid task type: {0:?}")]
pub struct ParseTaskTypeError(String);

impl FromStr for TaskType {
    type Err = ParseTaskTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coding" => Ok(TaskType::Coding),
            "behavioral" => Ok(TaskType::Behavioral),
            "verification" => Ok(TaskType::Verification),
            "testing" => Ok(TaskType::Testing),
            "configuration" => Ok(TaskType::Configuration),
            "documentation" => Ok(TaskType::Documentation),
            "refactoring" => Ok(TaskType::Refactoring),
            "implementation" => Ok(TaskType::Implementation),
            other => Err(ParseTaskTypeError(other.to_string())),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Coding => "coding",
            TaskType::Behavioral => "behavioral",
            TaskType::Verification => "verification",
            TaskType::Testing => "testing",
            TaskType::Configuration => "configuration",
            TaskType::Documentation => "documentation",
            TaskType::Refactoring => "refactoring",
            TaskType::Implementation => "implementation",
        };
        write!(f, "{s}")
    }
}

/// `DependencyNode.status` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

/// `DependencyNode.queue_location` (spec.md §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum QueueLocation {
    Ready,
    Waiting,
}

/// Dependency edge type (spec.md §3, §4.2: "soft dependencies never block promotion").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DependencyType {
    Hard,
    Soft,
}

/// `ValidationReport.confidence` (spec.md §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Confidence {
    None,
    Uncertain,
    Low,
    Medium,
    High,
}

/// Circuit breaker state (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One row per project: the persisted `SupervisorState` (spec.md §3).
///
/// `completed_tasks`, `blocked_tasks`, and `dependency_graph` are kept
/// relationally (in `tasks` / `task_dependencies`) rather than embedded as
/// JSON blobs, matching how this store models everything else; this row
/// carries only the scalar/singleton fields of `SupervisorState`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub project_id: String,
    pub status: SupervisorStatus,
    pub goal_description: String,
    pub goal_completed: bool,
    pub current_task_id: Option<String>,
    pub last_task_id: Option<String>,
    pub resource_exhausted_retry_task_id: Option<String>,
    pub resource_exhausted_retry_deadline: Option<DateTime<Utc>>,
    pub sandbox_root: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per task (spec.md §3 Task + DependencyNode, merged: a task and
/// its queue-graph node are the same entity here, as they are in the source
/// model — a `DependencyNode` is just a task viewed by the queue).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub task_id: String,
    pub project_id: String,
    pub intent: String,
    pub instructions: String,
    /// JSON array of strings.
    pub acceptance_criteria: serde_json::Value,
    pub task_type: TaskType,
    pub agent_mode: Option<String>,
    pub working_directory: Option<String>,
    /// JSON array of strings.
    pub required_artifacts: serde_json::Value,
    pub test_command: Option<String>,
    pub expected_json_schema: Option<serde_json::Value>,
    pub retry_max: i32,
    pub retry_count: i32,
    pub feature_id: Option<String>,
    pub session_id: Option<String>,
    pub status: TaskStatus,
    pub queue_location: QueueLocation,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Compact ValidationReport JSON, set on completion/blocking (spec.md §4.12).
    pub validation_report: Option<serde_json::Value>,
    pub blocked_reason: Option<String>,
}

/// `depends_on` edge (spec.md §3 Edge).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: String,
    pub project_id: String,
    pub depends_on: String,
    pub dep_type: DependencyType,
}

/// `SessionInfo` (spec.md §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionInfo {
    pub project_id: String,
    pub feature_id: String,
    pub session_id: String,
    pub provider: String,
    pub last_used: DateTime<Utc>,
    pub error_count: i32,
    pub total_tokens: i64,
    pub task_id: Option<String>,
}

/// Per-provider circuit breaker row (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CircuitBreaker {
    pub project_id: String,
    pub provider: String,
    pub state: BreakerState,
    pub open_until: Option<DateTime<Utc>>,
    pub trip_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Validation cache row (spec.md §4.8 step "Cache lookup", §9 "Validation cache").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ValidationCacheEntry {
    pub project_id: String,
    pub criterion_hash: String,
    pub content_hash: String,
    pub report: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry (spec.md §7 "every terminal transition appends
/// one audit record").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub project_id: String,
    pub event: String,
    pub task_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_display_and_fromstr() {
        for (s, t) in [
            ("coding", TaskType::Coding),
            ("behavioral", TaskType::Behavioral),
            ("verification", TaskType::Verification),
            ("testing", TaskType::Testing),
            ("configuration", TaskType::Configuration),
            ("documentation", TaskType::Documentation),
            ("refactoring", TaskType::Refactoring),
            ("implementation", TaskType::Implementation),
        ] {
            assert_eq!(t.to_string(), s);
            assert_eq!(TaskType::from_str(s).unwrap(), t);
        }
    }

    #[test]
    fn task_type_rejects_unknown() {
        assert!(TaskType::from_str("bogus").is_err());
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::None < Confidence::Uncertain);
        assert!(Confidence::Uncertain < Confidence::Low);
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }
}
