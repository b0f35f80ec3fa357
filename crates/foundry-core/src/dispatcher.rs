//! Dispatch algorithm (spec.md §4.5): iterate a priority list of providers,
//! skipping any whose breaker is `OPEN`, failing over with a pre-context
//! summary when one trips mid-task.

use std::path::Path;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::breaker;
use crate::error::{DispatchError, DispatchErrorClass, HaltReason};
use crate::provider::{DispatchOutcome, DispatchRequest, ProviderRegistry};
use crate::retry::PreContext;

/// A completed dispatch plus which provider (by priority index) served it.
pub struct DispatchResult {
    pub outcome: DispatchOutcome,
    pub provider_index: usize,
}

/// Dispatch `prompt` against the first usable provider in `priority`,
/// failing over on circuit-tripping errors (spec.md §4.5 steps 1-3).
///
/// `base_prompt` is re-sent to each subsequent provider with a pre-context
/// block prepended summarising the previous provider's failure (spec.md
/// §4.11 "Pre-context injection", provider-switch variant).
pub async fn dispatch_with_failover(
    pool: &PgPool,
    project_id: &str,
    registry: &ProviderRegistry,
    priority: &[String],
    working_directory: &Path,
    base_prompt: &str,
    agent_mode: Option<&str>,
    resume_session_id: Option<&str>,
    feature_id: Option<&str>,
    task_id: Option<&str>,
    pre_context_enabled: bool,
    pre_context_max_lines: usize,
) -> Result<DispatchResult, HaltReason> {
    let mut prompt = base_prompt.to_string();
    let mut last_error: Option<(String, String)> = None;

    for (index, provider_name) in priority.iter().enumerate() {
        let usable = breaker::is_usable(pool, project_id, provider_name)
            .await
            .map_err(|e| HaltReason::StatePersistFailure { detail: e.to_string() })?;
        if !usable {
            info!(provider = %provider_name, "skipping provider: breaker open");
            continue;
        }

        let Some(provider) = registry.get(provider_name) else {
            warn!(provider = %provider_name, "provider in priority list is not registered");
            continue;
        };

        let request = DispatchRequest {
            prompt: prompt.clone(),
            working_directory: working_directory.to_path_buf(),
            agent_mode: agent_mode.map(str::to_string),
            resume_session_id: resume_session_id.map(str::to_string),
            feature_id: feature_id.map(str::to_string),
            task_id: task_id.map(str::to_string),
        };

        match provider.dispatch(&request).await {
            Ok(outcome) => {
                // A non-zero exit with no classified keyword is still a
                // dispatch failure (spec.md §7: "provider non-zero exit"
                // fails over with pre-context injection), just not one that
                // maps to a named rate-limit/quota/auth signal.
                let class = breaker::classify_failure(&outcome.stderr, &outcome.raw_output)
                    .or_else(|| (!outcome.succeeded()).then_some(DispatchErrorClass::ExecFailure));

                if let Some(class) = class {
                    warn!(provider = %provider_name, ?class, exit_code = ?outcome.exit_code, "dispatch reported a circuit-tripping condition");
                    let _ = breaker::trip(pool, project_id, provider_name).await;

                    if pre_context_enabled {
                        let ctx = PreContext::provider_switch(
                            provider_name,
                            &format!("{class:?}"),
                            &[],
                            None,
                        );
                        prompt = ctx.render(pre_context_max_lines) + "\n\n" + base_prompt;
                    }
                    last_error = Some((provider_name.clone(), format!("{class:?}")));
                    continue;
                }

                return Ok(DispatchResult { outcome, provider_index: index });
            }
            Err(DispatchError::Timeout { .. }) | Err(DispatchError::NonZeroExit { .. }) => {
                last_error = Some((provider_name.clone(), "dispatch failure".to_string()));
                continue;
            }
            Err(err) => {
                last_error = Some((provider_name.clone(), err.to_string()));
                continue;
            }
        }
    }

    let _ = last_error;
    Err(HaltReason::ProviderCircuitBroken)
}
