//! Database query functions for the `projects` table (the persisted
//! `SupervisorState`, spec.md §3).

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Project, SupervisorStatus};

/// Create a project row if it does not already exist. Idempotent: calling
/// this twice for the same `project_id` is a no-op on the second call.
pub async fn ensure_project(
    pool: &PgPool,
    project_id: &str,
    goal_description: &str,
    sandbox_root: &str,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (project_id, goal_description, sandbox_root) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (project_id) DO UPDATE SET project_id = EXCLUDED.project_id \
         RETURNING *",
    )
    .bind(project_id)
    .bind(goal_description)
    .bind(sandbox_root)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to ensure project {project_id}"))?;

    Ok(project)
}

/// Fetch a project's current state snapshot. Returns `None` if the project
/// has never been enqueued into (spec.md §3: "created on first enqueue").
pub async fn get_project(pool: &PgPool, project_id: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE project_id = $1")
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch project {project_id}"))?;

    Ok(project)
}

/// Set `current_task_id` (spec.md §4.1 step 4: "Set state.current_task = task; persist").
pub async fn set_current_task(
    pool: &PgPool,
    project_id: &str,
    task_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET current_task_id = $2, updated_at = now() WHERE project_id = $1",
    )
    .bind(project_id)
    .bind(task_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to set current task for project {project_id}"))?;

    Ok(())
}

/// Set `supervisor.status` (spec.md §3, §4.1 step 2, §4.3, halts in §4.10).
pub async fn set_status(pool: &PgPool, project_id: &str, status: SupervisorStatus) -> Result<()> {
    sqlx::query("UPDATE projects SET status = $2, updated_at = now() WHERE project_id = $1")
        .bind(project_id)
        .bind(status)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set status for project {project_id}"))?;

    Ok(())
}

/// Mark the goal completed and the project `COMPLETED` (spec.md §4.3: "completed = true").
pub async fn mark_goal_completed(pool: &PgPool, project_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET goal_completed = true, status = 'completed', \
         current_task_id = NULL, updated_at = now() WHERE project_id = $1",
    )
    .bind(project_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to mark goal completed for project {project_id}"))?;

    Ok(())
}

/// Schedule a resource-exhausted retry (spec.md §4.1 step 7, §4.2 `retrieve()`).
pub async fn schedule_resource_exhausted_retry(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    deadline: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET resource_exhausted_retry_task_id = $2, \
         resource_exhausted_retry_deadline = $3, updated_at = now() \
         WHERE project_id = $1",
    )
    .bind(project_id)
    .bind(task_id)
    .bind(deadline)
    .execute(pool)
    .await
    .with_context(|| format!("failed to schedule retry for project {project_id}"))?;

    Ok(())
}

/// Clear a previously scheduled resource-exhausted retry slot.
pub async fn clear_resource_exhausted_retry(pool: &PgPool, project_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET resource_exhausted_retry_task_id = NULL, \
         resource_exhausted_retry_deadline = NULL, updated_at = now() \
         WHERE project_id = $1",
    )
    .bind(project_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to clear retry schedule for project {project_id}"))?;

    Ok(())
}

/// Record the last task processed, for `supervisor.last_task_id`.
pub async fn set_last_task_id(pool: &PgPool, project_id: &str, task_id: &str) -> Result<()> {
    sqlx::query("UPDATE projects SET last_task_id = $2, updated_at = now() WHERE project_id = $1")
        .bind(project_id)
        .bind(task_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set last task id for project {project_id}"))?;

    Ok(())
}
