//! `foundry reset-sessions` command: manual session eviction (spec.md
//! §4.7 eviction, §10.5 CLI surface).

use anyhow::Result;
use sqlx::PgPool;

use foundry_db::queries::sessions;

/// Evict one session by `feature_id`, or every session in the project when
/// `feature_id` is omitted.
pub async fn run_reset_sessions(pool: &PgPool, project_id: &str, feature_id: Option<&str>) -> Result<()> {
    match feature_id {
        Some(feature_id) => {
            sessions::evict_session(pool, project_id, feature_id).await?;
            println!("Evicted session for feature_id={feature_id}");
        }
        None => {
            let all = sessions::list_sessions(pool, project_id).await?;
            for session in &all {
                sessions::evict_session(pool, project_id, &session.feature_id).await?;
            }
            println!("Evicted {} session(s) for project {project_id}", all.len());
        }
    }
    Ok(())
}
