//! `foundry dump-state` command: read-only inspection of a project's
//! `SupervisorState` and queue contents, printed as JSON (spec.md §10.5).

use anyhow::{Context, Result};
use sqlx::PgPool;

use foundry_db::queries::{projects, sessions, tasks};

pub async fn run_dump_state(pool: &PgPool, project_id: &str) -> Result<()> {
    let project = projects::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;
    let task_list = tasks::list_tasks_for_project(pool, project_id).await?;
    let session_list = sessions::list_sessions(pool, project_id).await?;
    let progress = tasks::project_progress(pool, project_id).await?;

    let dump = serde_json::json!({
        "supervisor": project,
        "progress": {
            "total": progress.total,
            "completed": progress.completed,
            "blocked": progress.blocked,
        },
        "tasks": task_list,
        "sessions": session_list,
    });

    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
