//! The Control Loop (spec.md §4.1): the single-writer sequential driver
//! that ties every other module in this crate together. Each call to
//! [`run_iteration`] executes the nine ordered steps; [`run`] wraps it in
//! the suspension-point sleeps and a graceful shutdown signal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use foundry_db::models::{Confidence, SupervisorStatus};
use foundry_db::queries::projects;

use crate::error::HaltReason;
use crate::goal::{self, GoalOutcome};
use crate::halt;
use crate::helper;
use crate::metrics::TaskMetrics;
use crate::prompt::{self, strategy_for, Pipeline, PromptContext};
use crate::provider::ProviderRegistry;
use crate::queue;
use crate::retry::{repeated_error_guard, PreContext};
use crate::session::{self, SessionPolicy};
use crate::validator::{self, checks::CheckSpec, CodingValidationInput};
use crate::{dispatcher, finalizer};

/// Queue-empty and resource-exhausted-retry poll intervals (spec.md §5
/// "Suspension points").
const QUEUE_EMPTY_SLEEP: Duration = Duration::from_secs(1);
const RESOURCE_EXHAUSTED_POLL: Duration = Duration::from_secs(60);

/// Static configuration for one project's control loop, assembled once at
/// `foundry run` startup from the resolved config chain (spec.md §10.3).
pub struct ControlLoopConfig {
    pub provider_priority: Vec<String>,
    pub session_policy: SessionPolicy,
    pub pre_context_enabled: bool,
    pub pre_context_max_lines: usize,
    pub max_interrogation_rounds: u32,
    pub check_registry: HashMap<String, Vec<CheckSpec>>,
    pub keyword_registry: HashMap<String, Vec<String>>,
    pub metrics_dir: PathBuf,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            provider_priority: vec!["claude".to_string()],
            session_policy: SessionPolicy::default(),
            pre_context_enabled: true,
            pre_context_max_lines: 10,
            max_interrogation_rounds: 1,
            check_registry: HashMap::new(),
            keyword_registry: HashMap::new(),
            metrics_dir: PathBuf::from("./metrics"),
        }
    }
}

/// What one iteration did, so the caller (`run`) knows whether to sleep,
/// keep going, or stop entirely.
#[derive(Debug)]
pub enum IterationOutcome {
    /// A task was dispatched, validated (successfully or not), and the
    /// loop should proceed immediately to the next iteration.
    Progressed,
    /// The ready/waiting queues were empty and the goal was not yet
    /// complete; sleep `QUEUE_EMPTY_SLEEP` before continuing.
    QueueEmpty,
    /// A resource-exhausted retry is scheduled for the future; sleep up to
    /// `RESOURCE_EXHAUSTED_POLL` before checking again.
    ResourceExhaustedWait,
    /// The goal is complete.
    Completed,
    /// The project reached a terminal non-running status (already halted,
    /// blocked, or completed by a prior iteration) — `run` should stop.
    Terminal(SupervisorStatus),
    /// This iteration halted the project.
    Halted(HaltReason),
}

/// On a retried task, rebuild a fix prompt (spec.md §4.6 "Fix prompt") from
/// the compact report the prior attempt left on the task row, rather than
/// re-sending the full task-dispatch prompt.
fn prior_fix_prompt(task: &foundry_db::models::Task) -> Option<String> {
    let prior = task.validation_report.as_ref()?;
    let string_array = |key: &str| -> Vec<String> {
        prior
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let report = validator::ValidationReport {
        valid: false,
        confidence: Confidence::Low,
        failed_criteria: string_array("failed_criteria"),
        uncertain_criteria: string_array("uncertain_criteria"),
        criteria_confidence: HashMap::new(),
        reasoning: None,
    };
    Some(prompt::build_fix_prompt(task, &report))
}

/// Run exactly one control-loop iteration (spec.md §4.1 steps 1-9).
pub async fn run_iteration(
    pool: &PgPool,
    project_id: &str,
    registry: &ProviderRegistry,
    config: &ControlLoopConfig,
) -> Result<IterationOutcome> {
    // Step 1: load state snapshot; fail-fast halt on missing required fields.
    let Some(project) = projects::get_project(pool, project_id).await? else {
        let reason = HaltReason::MissingStateField { field: "project".to_string() };
        halt::halt(pool, project_id, None, &reason).await?;
        return Ok(IterationOutcome::Halted(reason));
    };

    // Step 2: only a RUNNING project keeps iterating. A project is never
    // left non-RUNNING with a resource-exhausted retry still pending — that
    // retry is tracked on an otherwise-RUNNING project (see `queue::retrieve`)
    // — so the "else sleep 1s" branch spec.md §4.1 step 2 describes for a
    // non-RUNNING project degenerates here to an unconditional stop: HALTED,
    // BLOCKED, and COMPLETED are all terminal in this implementation.
    if project.status != SupervisorStatus::Running {
        return Ok(IterationOutcome::Terminal(project.status));
    }
    if let Some(deadline) = project.resource_exhausted_retry_deadline {
        if Utc::now() < deadline {
            return Ok(IterationOutcome::ResourceExhaustedWait);
        }
    }

    // Step 3: retrieve a task, or run the Goal Completion Check.
    let Some(task) = queue::retrieve(pool, project_id).await? else {
        return run_goal_completion(pool, project_id, registry, config, &project).await;
    };

    // Step 4: mark this task current and persist.
    projects::set_current_task(pool, project_id, Some(&task.task_id)).await?;
    let _ = foundry_db::queries::tasks::transition_status(
        pool,
        project_id,
        &task.task_id,
        task.status,
        foundry_db::models::TaskStatus::InProgress,
    )
    .await?;

    let sandbox_root = task
        .working_directory
        .clone()
        .unwrap_or_else(|| format!("{}/{project_id}", project.sandbox_root));
    let sandbox_path = Path::new(&sandbox_root);

    let mut metrics = TaskMetrics::new(&task.task_id);

    // Step 5: resolve the session, build the prompt, dispatch.
    let feature_id = session::resolve_feature_id(task.feature_id.as_deref(), &task.task_id, project_id);
    let resolved_session = session::resolve(pool, project_id, &feature_id, &config.session_policy).await?;

    let ctx = PromptContext {
        project_id: project_id.to_string(),
        sandbox_root: sandbox_root.clone(),
        goal_description: project.goal_description.clone(),
        last_task_id: project.last_task_id.clone(),
        recent_completed_summaries: vec![],
        blocked_task_ids: vec![],
    };
    let task_prompt = if task.retry_count > 0 {
        prior_fix_prompt(&task).unwrap_or_else(|| prompt::build_task_prompt(&task, &ctx, &sandbox_root))
    } else {
        prompt::build_task_prompt(&task, &ctx, &sandbox_root)
    };
    metrics.prompt_bytes = task_prompt.len() as u64;

    let dispatch_result = dispatcher::dispatch_with_failover(
        pool,
        project_id,
        registry,
        &config.provider_priority,
        sandbox_path,
        &task_prompt,
        task.agent_mode.as_deref(),
        resolved_session.resume_session_id.as_deref(),
        Some(&feature_id),
        Some(&task.task_id),
        config.pre_context_enabled,
        config.pre_context_max_lines,
    )
    .await;

    let dispatch = match dispatch_result {
        Ok(result) => result,
        Err(reason) => {
            halt::halt(pool, project_id, Some(&task.task_id), &reason).await?;
            return Ok(IterationOutcome::Halted(reason));
        }
    };
    metrics.response_bytes = dispatch.outcome.raw_output.len() as u64;

    // Step 6: update the session registry.
    let provider_used = &dispatch.outcome.provider;
    if dispatch.outcome.succeeded() {
        if let Some(session_id) = &dispatch.outcome.session_id {
            foundry_db::queries::tasks::set_task_session(pool, project_id, &task.task_id, session_id).await?;
        }
        session::record_success(
            pool,
            project_id,
            &feature_id,
            dispatch.outcome.session_id.as_deref().unwrap_or(&feature_id),
            provider_used,
            dispatch.outcome.usage.total_tokens,
            Some(&task.task_id),
        )
        .await?;
    } else {
        session::record_failure(pool, project_id, &feature_id).await?;
    }

    // Step 7: hard halts on provider output.
    if let Some(marker) = halt::find_fatal_marker(&dispatch.outcome.raw_output) {
        let reason = match marker {
            "RESOURCE_EXHAUSTED" => {
                let deadline = Utc::now() + chrono::Duration::seconds(RESOURCE_EXHAUSTED_POLL.as_secs() as i64);
                projects::schedule_resource_exhausted_retry(pool, project_id, &task.task_id, deadline).await?;
                return Ok(IterationOutcome::ResourceExhaustedWait);
            }
            "OUTPUT_FORMAT_INVALID" => HaltReason::OutputFormatInvalid { detail: dispatch.outcome.raw_output.clone() },
            "PROVIDER_CIRCUIT_BROKEN" => HaltReason::ProviderCircuitBroken,
            _ => HaltReason::Blocked { task_id: task.task_id.clone(), reason: marker.to_string() },
        };
        halt::halt(pool, project_id, Some(&task.task_id), &reason).await?;
        return Ok(IterationOutcome::Halted(reason));
    }

    let soft_marker = halt::find_soft_marker(&dispatch.outcome.raw_output);
    if let Some(marker) = soft_marker {
        warn!(task_id = %task.task_id, marker, "soft halt marker, retry orchestrator will ask a clarifying question");
    }

    // Step 8: validate.
    let pipeline = strategy_for(task.task_type).validator();
    let report = validator::validate(
        pool,
        project_id,
        &task,
        pipeline,
        &dispatch.outcome.raw_output,
        CodingValidationInput {
            sandbox_root: sandbox_path,
            raw_output: &dispatch.outcome.raw_output,
            check_registry: &config.check_registry,
            keyword_registry: &config.keyword_registry,
        },
    )
    .await?;

    if report.valid {
        finalizer::finalize(pool, project_id, &task.task_id, &report, &config.metrics_dir, &mut metrics).await?;
        projects::set_last_task_id(pool, project_id, &task.task_id).await?;
        return Ok(IterationOutcome::Progressed);
    }

    // Step 8 (continued): Retry Orchestrator.
    run_retry_orchestrator(
        pool,
        project_id,
        registry,
        config,
        &task,
        sandbox_path,
        &feature_id,
        &report,
        &dispatch.outcome.raw_output,
        soft_marker,
        &mut metrics,
    )
    .await?;

    Ok(IterationOutcome::Progressed)
}

/// Step 3's fallback: Goal Completion Check (spec.md §4.3).
async fn run_goal_completion(
    pool: &PgPool,
    project_id: &str,
    registry: &ProviderRegistry,
    config: &ControlLoopConfig,
    project: &foundry_db::models::Project,
) -> Result<IterationOutcome> {
    let prompt_text = prompt::build_goal_completion_prompt(&project.goal_description, &[]);
    let sandbox_path = Path::new(&project.sandbox_root);

    let dispatch_result = dispatcher::dispatch_with_failover(
        pool,
        project_id,
        registry,
        &config.provider_priority,
        sandbox_path,
        &prompt_text,
        None,
        None,
        Some("goal-completion"),
        None,
        config.pre_context_enabled,
        config.pre_context_max_lines,
    )
    .await;

    let dispatch = match dispatch_result {
        Ok(result) => result,
        // "Provider error: do not halt; sleep and retry next iteration."
        Err(_) => return Ok(IterationOutcome::QueueEmpty),
    };

    let verdict: goal::GoalVerdict = match validator::parse_agent_json(&dispatch.outcome.raw_output) {
        Ok(v) => match serde_json::from_value(v) {
            Ok(v) => v,
            Err(_) => return Ok(IterationOutcome::QueueEmpty),
        },
        Err(_) => return Ok(IterationOutcome::QueueEmpty),
    };

    let queue_empty = queue::exhausted(pool, project_id).await?;
    match goal::evaluate(&verdict, queue_empty) {
        GoalOutcome::Completed => {
            projects::mark_goal_completed(pool, project_id).await?;
            Ok(IterationOutcome::Completed)
        }
        GoalOutcome::Halt(_) => {
            let reason = goal::halt_reason(&verdict);
            halt::halt(pool, project_id, None, &reason).await?;
            Ok(IterationOutcome::Halted(reason))
        }
        GoalOutcome::Retry => Ok(IterationOutcome::QueueEmpty),
    }
}

/// Step 8's failure path (spec.md §4.11): helper verification, then
/// interrogation, then fix-retry or block.
#[allow(clippy::too_many_arguments)]
async fn run_retry_orchestrator(
    pool: &PgPool,
    project_id: &str,
    registry: &ProviderRegistry,
    config: &ControlLoopConfig,
    task: &foundry_db::models::Task,
    sandbox_root: &Path,
    feature_id: &str,
    report: &validator::ValidationReport,
    prior_response: &str,
    soft_marker: Option<&'static str>,
    metrics: &mut TaskMetrics,
) -> Result<()> {
    use foundry_db::models::TaskType;

    // A soft halt marker (AMBIGUITY / ASKED_QUESTION / CURSOR_EXEC_FAILURE)
    // takes priority over the confidence-driven helper/interrogation path:
    // the agent itself flagged it needs one declarative answer, not a
    // verification pass (spec.md §4.10, §4.11 "three variants... distinct
    // headers").
    if let Some(marker) = soft_marker {
        let clarification_prompt = prompt::build_clarification_prompt(task, prior_response);
        let clarified = dispatcher::dispatch_with_failover(
            pool,
            project_id,
            registry,
            &config.provider_priority,
            sandbox_root,
            &clarification_prompt,
            task.agent_mode.as_deref(),
            None,
            Some(feature_id),
            Some(&task.task_id),
            config.pre_context_enabled,
            config.pre_context_max_lines,
        )
        .await;
        if let Ok(dispatch) = clarified {
            info!(task_id = %task.task_id, marker, "clarification round completed");
            let _ = PreContext::retry(&[], Some(&dispatch.outcome.raw_output));
        }
        foundry_db::queries::tasks::record_retry(pool, project_id, &task.task_id).await?;
        return Ok(());
    }

    let uncertain_like = matches!(report.confidence, Confidence::Uncertain | Confidence::Low);
    let is_behavioral = task.task_type == TaskType::Behavioral;

    let mut confirmed = false;

    if uncertain_like && !is_behavioral {
        let criteria: Vec<String> = report
            .failed_criteria
            .iter()
            .chain(report.uncertain_criteria.iter())
            .cloned()
            .collect();
        if !criteria.is_empty() {
            let helper_feature = session::helper_feature_id(feature_id);
            let verification_prompt = helper::build_verification_prompt(
                &criteria,
                prior_response,
                &sandbox_root.display().to_string(),
            );
            metrics.helper_agent_calls += 1;
            let start = std::time::Instant::now();
            if let Ok(dispatch) = dispatcher::dispatch_with_failover(
                pool,
                project_id,
                registry,
                &config.provider_priority,
                sandbox_root,
                &verification_prompt,
                task.agent_mode.as_deref(),
                None,
                Some(&helper_feature),
                Some(&task.task_id),
                config.pre_context_enabled,
                config.pre_context_max_lines,
            )
            .await
            {
                metrics.helper_durations_ms.push(start.elapsed().as_millis() as u64);
                if let Ok(commands) = helper::parse_helper_commands(&dispatch.outcome.raw_output) {
                    confirmed = helper::run_verification_commands(&commands, sandbox_root).await;
                }
            }
        }
    }

    if confirmed {
        let passing_report = validator::ValidationReport { valid: true, ..report.clone() };
        finalizer::finalize(pool, project_id, &task.task_id, &passing_report, &config.metrics_dir, metrics).await?;
        return Ok(());
    }

    // Interrogation rounds (spec.md §4.11 step 2).
    let max_rounds = config.max_interrogation_rounds.clamp(1, 4);
    let mut interrogation_confirmed = false;
    for round in 0..max_rounds {
        let interrogation_prompt = format!(
            "Round {round}: report the COMPLETE/INCOMPLETE/NOT_STARTED status of each criterion below with the file paths that prove it.\n{}",
            report.failed_criteria.iter().chain(report.uncertain_criteria.iter()).map(|c| format!("- {c}")).collect::<Vec<_>>().join("\n"),
        );
        let Ok(dispatch) = dispatcher::dispatch_with_failover(
            pool,
            project_id,
            registry,
            &config.provider_priority,
            sandbox_root,
            &interrogation_prompt,
            task.agent_mode.as_deref(),
            None,
            Some(feature_id),
            Some(&task.task_id),
            config.pre_context_enabled,
            config.pre_context_max_lines,
        )
        .await
        else {
            break;
        };

        match helper::evaluate_interrogation_round(&dispatch.outcome.raw_output, sandbox_root) {
            Ok(helper::InterrogationOutcome::AllConfirmed) => {
                interrogation_confirmed = true;
                break;
            }
            Ok(helper::InterrogationOutcome::EarlyExitNotStarted(_)) => break,
            _ => continue,
        }
    }

    if interrogation_confirmed {
        let passing_report = validator::ValidationReport { valid: true, ..report.clone() };
        finalizer::finalize(pool, project_id, &task.task_id, &passing_report, &config.metrics_dir, metrics).await?;
        return Ok(());
    }

    // `repeated_error_guard` wants the last 3 attempts' error text; this
    // report only has this round's failed criteria, so the guard only ever
    // fires when a single round repeats one failure 3 times in its list. A
    // cross-retry history would need its own column on `tasks` to track.
    if repeated_error_guard(&report.failed_criteria) {
        foundry_db::queries::tasks::block_task(
            pool,
            project_id,
            &task.task_id,
            "repeated identical error across retries",
        )
        .await?;
        return Ok(());
    }

    if task.retry_count < task.retry_max {
        let _ = PreContext::retry(&[], report.failed_criteria.first().map(String::as_str));
        foundry_db::queries::tasks::record_retry(pool, project_id, &task.task_id).await?;
        return Ok(());
    }

    // Final interrogation already attempted above via the same loop when
    // retry_count >= retry_max; if we're here it did not confirm.
    foundry_db::queries::tasks::block_task(
        pool,
        project_id,
        &task.task_id,
        report.failed_criteria.join("; ").as_str(),
    )
    .await?;
    Ok(())
}

/// Wrap `run_iteration` in the suspension-point sleeps and a cooperative
/// shutdown signal (spec.md §5 "the loop itself honours a process-level
/// shutdown signal between iterations, never mid-dispatch").
pub async fn run(
    pool: &PgPool,
    project_id: &str,
    registry: &ProviderRegistry,
    config: &ControlLoopConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            info!(project_id, "shutdown signal received between iterations");
            return Ok(());
        }

        let outcome = run_iteration(pool, project_id, registry, config)
            .await
            .context("control loop iteration failed")?;

        match outcome {
            IterationOutcome::Progressed => continue,
            IterationOutcome::QueueEmpty => {
                tokio::select! {
                    _ = tokio::time::sleep(QUEUE_EMPTY_SLEEP) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
            IterationOutcome::ResourceExhaustedWait => {
                tokio::select! {
                    _ = tokio::time::sleep(RESOURCE_EXHAUSTED_POLL) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
            IterationOutcome::Completed => {
                info!(project_id, "goal completed, control loop exiting");
                return Ok(());
            }
            IterationOutcome::Terminal(status) => {
                info!(project_id, ?status, "project is not running, control loop exiting");
                return Ok(());
            }
            IterationOutcome::Halted(reason) => {
                warn!(project_id, reason = %reason, "control loop halted");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_sleep_and_round_bounds() {
        let config = ControlLoopConfig::default();
        assert_eq!(config.max_interrogation_rounds, 1);
        assert!(config.pre_context_enabled);
    }
}
