//! `foundry run` command: start the single-writer sequential control loop
//! for one project (spec.md §4.1) and drive it to completion or halt.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use foundry_core::control_loop::{self, ControlLoopConfig};
use foundry_core::provider::cli::{CliProvider, CliProviderConfig};
use foundry_core::provider::ProviderRegistry;
use foundry_db::queries::{audit, projects, tasks};

use crate::config::FoundryConfig;

/// Resolve a `CliProvider` for each entry in `priority`. The binary for a
/// provider named `claude` is looked up as `claude` on `PATH`; this mirrors
/// spec.md §6's provider-priority list and keeps provider wiring entirely
/// config-driven, with no provider-specific code in the control loop.
fn build_registry(priority: &[String]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for name in priority {
        registry.register(CliProvider::new(CliProviderConfig::new(name.clone(), name.clone())));
    }
    registry
}

/// Run the `run` command: reset any crash-orphaned `in_progress` tasks,
/// then drive the control loop until it halts, completes, or is
/// interrupted.
pub async fn run_run(pool: &PgPool, project_id: &str, config: &FoundryConfig) -> Result<()> {
    let project = projects::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} has no enqueued tasks; run `foundry enqueue` first"))?;

    let reset = tasks::reset_in_progress_tasks(pool, project_id).await?;
    if !reset.is_empty() {
        println!("Recovered {} in-progress task(s) left over from an unclean shutdown:", reset.len());
        for task_id in &reset {
            println!("  - {task_id}");
        }
    }

    println!("Running project {project_id} ({})", project.goal_description);

    let registry = build_registry(&config.provider_priority);
    if registry.is_empty() {
        anyhow::bail!("no providers configured; set provider.priority in the config file");
    }

    let loop_config = ControlLoopConfig {
        provider_priority: config.provider_priority.clone(),
        session_policy: config.session_policy.clone(),
        pre_context_enabled: config.pre_context_enabled,
        pre_context_max_lines: config.pre_context_max_lines,
        max_interrogation_rounds: config.max_interrogation_rounds,
        ..ControlLoopConfig::default()
    };

    // Graceful shutdown: first signal cancels between iterations, second
    // force-exits (matches the base crate's dispatch command).
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    control_loop::run(pool, project_id, &registry, &loop_config, cancel).await?;

    let final_project = projects::get_project(pool, project_id)
        .await?
        .context("project disappeared mid-run")?;
    let last_audit = audit::last_for_project(pool, project_id).await?;

    match final_project.status {
        foundry_db::models::SupervisorStatus::Completed => {
            println!("Goal completed.");
            Ok(())
        }
        foundry_db::models::SupervisorStatus::Running => {
            println!("Interrupted. Re-run `foundry run --project {project_id}` to resume.");
            std::process::exit(130);
        }
        status => {
            let reason = last_audit
                .and_then(|a| a.reason)
                .unwrap_or_else(|| "no reason recorded".to_string());
            println!("Halted ({status:?}): {reason}");
            std::process::exit(1);
        }
    }
}
