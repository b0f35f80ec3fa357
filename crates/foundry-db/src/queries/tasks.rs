//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{DependencyType, QueueLocation, Task, TaskStatus, TaskType};

/// Fields needed to insert a new task row (spec.md §3 Task).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub project_id: String,
    pub intent: String,
    pub instructions: String,
    pub acceptance_criteria: Vec<String>,
    pub task_type: TaskType,
    pub agent_mode: Option<String>,
    pub working_directory: Option<String>,
    pub required_artifacts: Vec<String>,
    pub test_command: Option<String>,
    pub expected_json_schema: Option<serde_json::Value>,
    pub retry_max: i32,
    pub feature_id: Option<String>,
    pub queue_location: QueueLocation,
}

/// Insert a task row inside an existing transaction. Callers run this as
/// part of a larger `enqueue` transaction (see `foundry_core::queue`) so
/// that dependency-cycle detection and the insert commit or roll back
/// together.
pub async fn insert_task(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewTask,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (task_id, project_id, intent, instructions, acceptance_criteria, \
         task_type, agent_mode, working_directory, required_artifacts, test_command, \
         expected_json_schema, retry_max, feature_id, queue_location, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING *",
    )
    .bind(&new.task_id)
    .bind(&new.project_id)
    .bind(&new.intent)
    .bind(&new.instructions)
    .bind(serde_json::to_value(&new.acceptance_criteria)?)
    .bind(new.task_type)
    .bind(&new.agent_mode)
    .bind(&new.working_directory)
    .bind(serde_json::to_value(&new.required_artifacts)?)
    .bind(&new.test_command)
    .bind(&new.expected_json_schema)
    .bind(new.retry_max)
    .bind(&new.feature_id)
    .bind(new.queue_location)
    .bind(match new.queue_location {
        QueueLocation::Ready => TaskStatus::Ready,
        QueueLocation::Waiting => TaskStatus::Pending,
    })
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("failed to insert task {:?}", new.task_id))?;

    Ok(task)
}

/// Insert a dependency edge inside an existing transaction.
pub async fn insert_dependency(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    project_id: &str,
    task_id: &str,
    depends_on: &str,
    dep_type: DependencyType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, project_id, depends_on, dep_type) \
         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(project_id)
    .bind(depends_on)
    .bind(dep_type)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert dependency {task_id} -> {depends_on}"))?;

    Ok(())
}

/// Whether a task with this id already exists in the project (spec.md §8
/// R1: "Enqueueing the same task JSON twice with identical task_id is
/// rejected on the second call").
pub async fn task_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    project_id: &str,
    task_id: &str,
) -> Result<bool> {
    let row: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM tasks WHERE project_id = $1 AND task_id = $2")
            .bind(project_id)
            .bind(task_id)
            .fetch_optional(&mut **tx)
            .await
            .context("failed to check task existence")?;

    Ok(row.is_some())
}

pub async fn get_task(pool: &PgPool, project_id: &str, task_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 AND task_id = $2",
    )
    .bind(project_id)
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch task {task_id}"))?;

    Ok(task)
}

/// All task ids + their hard/soft dependency edges for a project, used to
/// rebuild the dependency graph (spec.md §8 R2).
pub async fn list_dependency_edges(
    pool: &PgPool,
    project_id: &str,
) -> Result<Vec<(String, String, DependencyType)>> {
    let rows: Vec<(String, String, DependencyType)> = sqlx::query_as(
        "SELECT task_id, depends_on, dep_type FROM task_dependencies WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list dependency edges")?;

    Ok(rows)
}

pub async fn list_tasks_for_project(pool: &PgPool, project_id: &str) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// Oldest task currently in the `ready` queue (spec.md §4.2 `retrieve()`:
/// "pops head of ready").
pub async fn pop_ready_head(pool: &PgPool, project_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 AND queue_location = 'ready' \
         AND status = 'ready' ORDER BY created_at ASC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("failed to pop ready head")?;

    Ok(task)
}

/// Whether both queues are empty and no task is in flight (spec.md §4.2
/// `exhausted`).
pub async fn queues_exhausted(pool: &PgPool, project_id: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks WHERE project_id = $1 \
         AND status IN ('pending', 'ready', 'in_progress')",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to check queue exhaustion")?;

    Ok(row.0 == 0)
}

/// Waiting tasks whose hard dependencies are now all `completed` (spec.md
/// §4.2 `promoteOnCompletion`). Excludes `blocked` tasks: their hard
/// dependencies were already satisfied the first time they were dispatched,
/// so without this exclusion the very next unrelated completion would
/// silently re-promote them to `ready`, contradicting "no further dispatch
/// for that task until operator action" (spec.md §4.11 step 4, §8 S6).
pub async fn promotable_waiting_tasks(pool: &PgPool, project_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.task_id FROM tasks t \
         WHERE t.project_id = $1 AND t.queue_location = 'waiting' AND t.status <> 'blocked' \
           AND NOT EXISTS ( \
             SELECT 1 FROM task_dependencies d \
             JOIN tasks dep ON dep.project_id = d.project_id AND dep.task_id = d.depends_on \
             WHERE d.project_id = t.project_id AND d.task_id = t.task_id \
               AND d.dep_type = 'hard' AND dep.status <> 'completed' \
           ) \
         ORDER BY t.created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to compute promotable waiting tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Move a task from `waiting` to `ready` (spec.md §4.2 `promoteOnCompletion`).
pub async fn promote_to_ready(pool: &PgPool, project_id: &str, task_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET queue_location = 'ready', status = 'ready' \
         WHERE project_id = $1 AND task_id = $2 AND queue_location = 'waiting'",
    )
    .bind(project_id)
    .bind(task_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to promote task {task_id}"))?;

    Ok(())
}

/// Transition a task's status with an optimistic lock on `from`.
pub async fn transition_status(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET status = $4, \
         started_at = CASE WHEN $4 = 'in_progress' THEN now() ELSE started_at END, \
         completed_at = CASE WHEN $4 = 'completed' THEN now() ELSE completed_at END \
         WHERE project_id = $1 AND task_id = $2 AND status = $3",
    )
    .bind(project_id)
    .bind(task_id)
    .bind(from)
    .bind(to)
    .execute(pool)
    .await
    .with_context(|| format!("failed to transition task {task_id} from {from:?} to {to:?}"))?;

    Ok(result.rows_affected() > 0)
}

/// Record a retry: increment `retry_count`, clear `current`-ness, and
/// move back to the `ready` head (spec.md §4.11 step 3).
pub async fn record_retry(pool: &PgPool, project_id: &str, task_id: &str) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE tasks SET retry_count = retry_count + 1, status = 'ready', \
         queue_location = 'ready' \
         WHERE project_id = $1 AND task_id = $2 RETURNING retry_count",
    )
    .bind(project_id)
    .bind(task_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to record retry for task {task_id}"))?;

    Ok(row.0)
}

/// Mark a task blocked with a reason (spec.md §4.11 step 4, §9 S6).
pub async fn block_task(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = 'blocked', queue_location = 'waiting', \
         blocked_reason = $3 WHERE project_id = $1 AND task_id = $2",
    )
    .bind(project_id)
    .bind(task_id)
    .bind(reason)
    .execute(pool)
    .await
    .with_context(|| format!("failed to block task {task_id}"))?;

    Ok(())
}

/// Finalize a task as completed with its validation report (spec.md §4.12).
pub async fn complete_task(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    validation_report: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET status = 'completed', \
         completed_at = now(), validation_report = $3 \
         WHERE project_id = $1 AND task_id = $2",
    )
    .bind(project_id)
    .bind(task_id)
    .bind(validation_report)
    .execute(pool)
    .await
    .with_context(|| format!("failed to complete task {task_id}"))?;

    Ok(())
}

/// Update the `feature_id`/`session_id` association after dispatch (spec.md §4.7).
pub async fn set_task_session(
    pool: &PgPool,
    project_id: &str,
    task_id: &str,
    session_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET session_id = $3 WHERE project_id = $1 AND task_id = $2")
        .bind(project_id)
        .bind(task_id)
        .bind(session_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to set session on task {task_id}"))?;

    Ok(())
}

/// Crash recovery: any task left `in_progress` after an unclean shutdown is
/// reset to `ready` so the next `retrieve()` can redispatch it (spec.md §8
/// P7: "reloading state yields a valid SupervisorState").
pub async fn reset_in_progress_tasks(pool: &PgPool, project_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE tasks SET status = 'ready', queue_location = 'ready' \
         WHERE project_id = $1 AND status = 'in_progress' \
         RETURNING task_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to reset in-progress tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectProgress {
    pub total: i64,
    pub completed: i64,
    pub blocked: i64,
}

pub async fn project_progress(pool: &PgPool, project_id: &str) -> Result<ProjectProgress> {
    let row: (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
                COUNT(*) FILTER (WHERE status = 'completed'), \
                COUNT(*) FILTER (WHERE status = 'blocked') \
         FROM tasks WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to compute project progress")?;

    Ok(ProjectProgress {
        total: row.0,
        completed: row.1,
        blocked: row.2,
    })
}
