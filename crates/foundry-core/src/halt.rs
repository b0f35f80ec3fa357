//! Halt Handler (spec.md §4.10, §2 component 12): persists a halt reason,
//! writes an audit entry, and transitions the project to `HALTED`.

use anyhow::Result;
use foundry_db::models::SupervisorStatus;
use foundry_db::queries::{audit, projects};
use sqlx::PgPool;
use tracing::error;

use crate::error::HaltReason;

/// Markers inspected on provider output after dispatch (spec.md §4.10). The
/// first three are fatal at iteration scope; the last three are soft halts
/// handled by the Retry Orchestrator's clarification path instead of here.
pub const FATAL_MARKERS: &[&str] = &["RESOURCE_EXHAUSTED", "BLOCKED", "OUTPUT_FORMAT_INVALID", "PROVIDER_CIRCUIT_BROKEN"];
pub const SOFT_MARKERS: &[&str] = &["AMBIGUITY", "ASKED_QUESTION", "CURSOR_EXEC_FAILURE"];

/// Scan provider output for a fatal marker, returning the one found (checked
/// in the order listed in spec.md §4.10).
pub fn find_fatal_marker(raw_output: &str) -> Option<&'static str> {
    FATAL_MARKERS.iter().find(|m| raw_output.contains(**m)).copied()
}

/// Scan provider output for a soft-halt marker (clarification trigger).
pub fn find_soft_marker(raw_output: &str) -> Option<&'static str> {
    SOFT_MARKERS.iter().find(|m| raw_output.contains(**m)).copied()
}

/// Persist the halt: set `status = HALTED`, append an audit record with the
/// halt's code and message, clear `current_task` (spec.md §7 "Every terminal
/// transition appends one audit record").
pub async fn halt(
    pool: &PgPool,
    project_id: &str,
    task_id: Option<&str>,
    reason: &HaltReason,
) -> Result<()> {
    error!(project_id, reason = %reason, code = reason.code(), "halting control loop");
    projects::set_status(pool, project_id, SupervisorStatus::Halted).await?;
    projects::set_current_task(pool, project_id, None).await?;
    audit::append(pool, project_id, "halt", task_id, Some(&reason.to_string())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_resource_exhausted_marker() {
        assert_eq!(
            find_fatal_marker("status RESOURCE_EXHAUSTED: quota hit"),
            Some("RESOURCE_EXHAUSTED")
        );
    }

    #[test]
    fn finds_soft_marker_when_no_fatal_present() {
        assert!(find_fatal_marker("please clarify: AMBIGUITY detected").is_none());
        assert_eq!(find_soft_marker("please clarify: AMBIGUITY detected"), Some("AMBIGUITY"));
    }

    #[test]
    fn clean_output_has_no_markers() {
        assert!(find_fatal_marker("all good").is_none());
        assert!(find_soft_marker("all good").is_none());
    }
}
