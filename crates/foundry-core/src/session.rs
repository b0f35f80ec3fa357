//! Session Resolver (spec.md §4.7).
//!
//! Computes the `feature_id` a task's provider session is grouped under,
//! applies the eviction policy, and records dispatch outcomes. Sessions are
//! values owned by the State Store (spec.md §9 "Provider sessions"); this
//! module never holds a mutable reference across an await point.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, Utc};
use foundry_db::models::SessionInfo;
use foundry_db::queries::sessions;
use sqlx::PgPool;
use tracing::warn;

/// Suggested per-provider token ceilings before forced eviction (spec.md
/// §4.7). Overridden per-provider by `CONTEXT_LIMIT_<provider>` config.
pub fn default_context_limit(provider: &str) -> i64 {
    match provider {
        "gemini" => 1_500_000,
        "claude" => 200_000,
        "cursor" => 200_000,
        "copilot" => 100_000,
        "codex" => 8_000,
        _ => 200_000,
    }
}

const DEFAULT_ERROR_LIMIT: i32 = 5;
const DEFAULT_MAX_AGE: Duration = Duration::hours(24);

/// Policy knobs resolved from config (spec.md §6 configuration table).
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub context_limits: HashMap<String, i64>,
    pub error_limit: i32,
    pub max_age: Duration,
    pub disable_reuse: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            context_limits: HashMap::new(),
            error_limit: DEFAULT_ERROR_LIMIT,
            max_age: DEFAULT_MAX_AGE,
            disable_reuse: false,
        }
    }
}

impl SessionPolicy {
    pub fn context_limit(&self, provider: &str) -> i64 {
        self.context_limits
            .get(provider)
            .copied()
            .unwrap_or_else(|| default_context_limit(provider))
    }
}

/// Compute `feature_id` for a task (spec.md §4.7 resolution order).
pub fn resolve_feature_id(meta_feature_id: Option<&str>, task_id: &str, project_id: &str) -> String {
    if let Some(id) = meta_feature_id {
        return id.to_string();
    }
    if let Some(prefix) = task_id.split('_').next() {
        if prefix != task_id {
            return format!("task:{prefix}");
        }
    }
    format!("project:{project_id}")
}

/// Helper-agent sessions live under a distinct namespace so they never
/// collide with task sessions (spec.md §4.7).
pub fn helper_feature_id(feature_id: &str) -> String {
    format!("helper:{feature_id}")
}

/// Whether an existing session must be evicted before reuse (spec.md §4.7
/// eviction conditions, §8 P6).
pub fn should_evict(session: &SessionInfo, policy: &SessionPolicy) -> bool {
    let limit = policy.context_limit(&session.provider);
    session.total_tokens > limit
        || session.error_count >= policy.error_limit
        || Utc::now() - session.last_used > policy.max_age
}

/// The session id to resume with, if any, plus whether a stale session was
/// evicted first.
pub struct ResolvedSession {
    pub feature_id: String,
    pub resume_session_id: Option<String>,
    pub evicted: bool,
}

/// Resolve the session to use for a dispatch (spec.md §4.7). Evicts a stale
/// session if necessary; does not register a new session — that happens
/// after a successful dispatch via [`record_success`].
pub async fn resolve(
    pool: &PgPool,
    project_id: &str,
    feature_id: &str,
    policy: &SessionPolicy,
) -> Result<ResolvedSession> {
    if policy.disable_reuse {
        return Ok(ResolvedSession {
            feature_id: feature_id.to_string(),
            resume_session_id: None,
            evicted: false,
        });
    }

    let Some(session) = sessions::get_session(pool, project_id, feature_id).await? else {
        return Ok(ResolvedSession {
            feature_id: feature_id.to_string(),
            resume_session_id: None,
            evicted: false,
        });
    };

    if should_evict(&session, policy) {
        warn!(
            feature_id,
            total_tokens = session.total_tokens,
            error_count = session.error_count,
            "evicting stale session"
        );
        sessions::evict_session(pool, project_id, feature_id).await?;
        return Ok(ResolvedSession {
            feature_id: feature_id.to_string(),
            resume_session_id: None,
            evicted: true,
        });
    }

    Ok(ResolvedSession {
        feature_id: feature_id.to_string(),
        resume_session_id: Some(session.session_id),
        evicted: false,
    })
}

/// Register/refresh a session after a successful dispatch (spec.md §4.7:
/// "the Resolver registers it..." / "on subsequent success, accumulate
/// tokens and reset error count").
pub async fn record_success(
    pool: &PgPool,
    project_id: &str,
    feature_id: &str,
    session_id: &str,
    provider: &str,
    additional_tokens: i64,
    task_id: Option<&str>,
) -> Result<()> {
    match sessions::get_session(pool, project_id, feature_id).await? {
        Some(_) => {
            sessions::record_success(pool, project_id, feature_id, additional_tokens).await?;
        }
        None => {
            sessions::upsert_session(
                pool,
                project_id,
                feature_id,
                session_id,
                provider,
                additional_tokens,
                task_id,
            )
            .await?;
        }
    }
    Ok(())
}

/// Increment the error counter after a dispatch failure (spec.md §4.7).
pub async fn record_failure(pool: &PgPool, project_id: &str, feature_id: &str) -> Result<()> {
    sessions::record_failure(pool, project_id, feature_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_id_prefers_meta() {
        assert_eq!(
            resolve_feature_id(Some("explicit"), "t1_a", "proj"),
            "explicit"
        );
    }

    #[test]
    fn feature_id_falls_back_to_task_prefix() {
        assert_eq!(resolve_feature_id(None, "impl_auth_01", "proj"), "task:impl");
    }

    #[test]
    fn feature_id_falls_back_to_project_when_no_underscore() {
        assert_eq!(resolve_feature_id(None, "t1", "proj"), "project:proj");
    }

    #[test]
    fn helper_namespace_is_distinct() {
        assert_eq!(helper_feature_id("task:impl"), "helper:task:impl");
    }

    #[test]
    fn default_limits_match_spec_suggestions() {
        assert_eq!(default_context_limit("gemini"), 1_500_000);
        assert_eq!(default_context_limit("codex"), 8_000);
    }

    #[test]
    fn evicts_on_token_overflow() {
        let session = SessionInfo {
            project_id: "p".into(),
            feature_id: "f".into(),
            session_id: "s".into(),
            provider: "codex".into(),
            last_used: Utc::now(),
            error_count: 0,
            total_tokens: 9_000,
            task_id: None,
        };
        assert!(should_evict(&session, &SessionPolicy::default()));
    }

    #[test]
    fn evicts_on_error_limit() {
        let session = SessionInfo {
            project_id: "p".into(),
            feature_id: "f".into(),
            session_id: "s".into(),
            provider: "claude".into(),
            last_used: Utc::now(),
            error_count: 5,
            total_tokens: 0,
            task_id: None,
        };
        assert!(should_evict(&session, &SessionPolicy::default()));
    }

    #[test]
    fn does_not_evict_healthy_session() {
        let session = SessionInfo {
            project_id: "p".into(),
            feature_id: "f".into(),
            session_id: "s".into(),
            provider: "claude".into(),
            last_used: Utc::now(),
            error_count: 0,
            total_tokens: 1_000,
            task_id: None,
        };
        assert!(!should_evict(&session, &SessionPolicy::default()));
    }
}
