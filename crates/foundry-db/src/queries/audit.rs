//! Database query functions for the `audit_log` table (spec.md §7: "Every
//! terminal transition appends one audit record").

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::AuditEntry;

pub async fn append(
    pool: &PgPool,
    project_id: &str,
    event: &str,
    task_id: Option<&str>,
    reason: Option<&str>,
) -> Result<AuditEntry> {
    let entry = sqlx::query_as::<_, AuditEntry>(
        "INSERT INTO audit_log (project_id, event, task_id, reason) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(project_id)
    .bind(event)
    .bind(task_id)
    .bind(reason)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to append audit entry {event:?}"))?;

    Ok(entry)
}

pub async fn list_for_project(pool: &PgPool, project_id: &str) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list audit entries")?;

    Ok(entries)
}

/// Last audit record, used by the CLI to surface the halt reason on exit
/// (spec.md §6: "non-zero on unrecoverable halt, with the halt reason
/// appended to the audit log").
pub async fn last_for_project(pool: &PgPool, project_id: &str) -> Result<Option<AuditEntry>> {
    let entry = sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log WHERE project_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch last audit entry")?;

    Ok(entry)
}
