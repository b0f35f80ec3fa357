//! Database query functions for the `sessions` table (`SessionInfo`,
//! spec.md §3, §4.7).

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::SessionInfo;

pub async fn get_session(
    pool: &PgPool,
    project_id: &str,
    feature_id: &str,
) -> Result<Option<SessionInfo>> {
    let session = sqlx::query_as::<_, SessionInfo>(
        "SELECT * FROM sessions WHERE project_id = $1 AND feature_id = $2",
    )
    .bind(project_id)
    .bind(feature_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch session {feature_id}"))?;

    Ok(session)
}

/// Register a freshly opened session (spec.md §4.7: "the Resolver
/// registers it with total_tokens = usage.total, error_count = 0,
/// last_used = now").
pub async fn upsert_session(
    pool: &PgPool,
    project_id: &str,
    feature_id: &str,
    session_id: &str,
    provider: &str,
    total_tokens: i64,
    task_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sessions (project_id, feature_id, session_id, provider, \
         last_used, error_count, total_tokens, task_id) \
         VALUES ($1, $2, $3, $4, now(), 0, $5, $6) \
         ON CONFLICT (project_id, feature_id) DO UPDATE SET \
           session_id = EXCLUDED.session_id, provider = EXCLUDED.provider, \
           last_used = now(), total_tokens = EXCLUDED.total_tokens, task_id = EXCLUDED.task_id",
    )
    .bind(project_id)
    .bind(feature_id)
    .bind(session_id)
    .bind(provider)
    .bind(total_tokens)
    .bind(task_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert session {feature_id}"))?;

    Ok(())
}

/// Accumulate tokens and reset the error count after a successful dispatch
/// (spec.md §4.7: "on subsequent success, accumulate tokens and reset
/// error count").
pub async fn record_success(
    pool: &PgPool,
    project_id: &str,
    feature_id: &str,
    additional_tokens: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE sessions SET total_tokens = total_tokens + $3, error_count = 0, \
         last_used = now() WHERE project_id = $1 AND feature_id = $2",
    )
    .bind(project_id)
    .bind(feature_id)
    .bind(additional_tokens)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record session success for {feature_id}"))?;

    Ok(())
}

/// Increment the error counter after a dispatch failure (spec.md §4.7: "on
/// dispatch failure, increment error count").
pub async fn record_failure(pool: &PgPool, project_id: &str, feature_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sessions SET error_count = error_count + 1, last_used = now() \
         WHERE project_id = $1 AND feature_id = $2",
    )
    .bind(project_id)
    .bind(feature_id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record session failure for {feature_id}"))?;

    Ok(())
}

/// Evict a session (spec.md §4.7 eviction conditions).
pub async fn evict_session(pool: &PgPool, project_id: &str, feature_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE project_id = $1 AND feature_id = $2")
        .bind(project_id)
        .bind(feature_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to evict session {feature_id}"))?;

    Ok(())
}

/// List every session in a project, for `reset-sessions` with no
/// `feature_id` argument (spec.md §6 CLI surface).
pub async fn list_sessions(pool: &PgPool, project_id: &str) -> Result<Vec<SessionInfo>> {
    let sessions = sqlx::query_as::<_, SessionInfo>(
        "SELECT * FROM sessions WHERE project_id = $1 ORDER BY feature_id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list sessions")?;

    Ok(sessions)
}
