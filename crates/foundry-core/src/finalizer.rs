//! Task Finalizer (spec.md §4.12).
//!
//! Runs once a `ValidationReport` is `valid = true`: complete the task,
//! flush its metrics, append the audit record, then promote whatever
//! waiting tasks that completion unblocks.

use std::path::Path;

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use foundry_db::queries::{audit, projects};

use crate::metrics::TaskMetrics;
use crate::queue;
use crate::validator::ValidationReport;

fn compact_report(report: &ValidationReport) -> serde_json::Value {
    serde_json::json!({
        "valid": report.valid,
        "confidence": report.confidence,
        "failed_criteria": report.failed_criteria,
        "uncertain_criteria": report.uncertain_criteria,
    })
}

/// Finalize a completed task (spec.md §4.12): append to `completed_tasks`,
/// clear `current_task` and any retry scheduling, flush `TaskMetrics`,
/// append an audit record, persist state, then promote newly-ready tasks.
///
/// Returns the task ids promoted as a side effect, for logging by the
/// caller.
pub async fn finalize(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    report: &ValidationReport,
    metrics_dir: &Path,
    metrics: &mut TaskMetrics,
) -> Result<Vec<String>> {
    foundry_db::queries::tasks::complete_task(pool, project_id, task_id, &compact_report(report)).await?;
    projects::set_current_task(pool, project_id, None).await?;
    projects::clear_resource_exhausted_retry(pool, project_id).await?;

    metrics.status = foundry_db::models::TaskStatus::Completed;
    crate::metrics::flush(metrics_dir, project_id, metrics)?;

    audit::append(pool, project_id, "task_completed", Some(task_id), None).await?;

    let promoted = queue::promote_on_completion(pool, project_id).await?;
    if !promoted.is_empty() {
        info!(project_id, task_id, promoted = ?promoted, "promoted waiting tasks after completion");
    }

    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_db::models::Confidence;

    #[test]
    fn compact_report_carries_confidence_and_lists() {
        let report = ValidationReport {
            valid: true,
            confidence: Confidence::High,
            failed_criteria: vec![],
            uncertain_criteria: vec![],
            criteria_confidence: Default::default(),
            reasoning: None,
        };
        let json = compact_report(&report);
        assert_eq!(json["valid"], true);
        assert_eq!(json["confidence"], "High");
    }
}
