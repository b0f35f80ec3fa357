//! Circuit Breaker (spec.md §4.4).
//!
//! Per-provider `{CLOSED, OPEN, HALF_OPEN}` state machine gating dispatch.
//! Wraps `foundry_db::queries::breakers`; this module owns the cooldown
//! schedule and trip-classification policy.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use foundry_db::models::BreakerState;
use foundry_db::queries::breakers;
use sqlx::PgPool;
use tracing::warn;

use crate::error::DispatchErrorClass;

const INITIAL_COOLDOWN_SECS: i64 = 30;
const MAX_COOLDOWN_SECS: i64 = 30 * 60;

/// Exponential cooldown bounded at 30 minutes, doubling from a 30s floor
/// per consecutive trip (spec.md §4.4: "exponential, bounded (e.g., 30s ->
/// 30min)").
pub fn cooldown_for_trip_count(trip_count: u32) -> Duration {
    let secs = INITIAL_COOLDOWN_SECS
        .saturating_mul(1i64 << trip_count.min(6))
        .min(MAX_COOLDOWN_SECS);
    Duration::seconds(secs)
}

/// Whether a provider's breaker currently permits dispatch. Moves an
/// elapsed `OPEN` breaker to `HALF_OPEN` first, matching the dispatcher's
/// per-iteration "choose the first CLOSED provider" scan (spec.md §4.5 step 1).
pub async fn is_usable(pool: &PgPool, project_id: &str, provider: &str) -> Result<bool> {
    breakers::move_to_half_open(pool, project_id, provider).await?;
    match breakers::get_breaker(pool, project_id, provider).await? {
        None => Ok(true),
        Some(b) => Ok(!matches!(b.state, BreakerState::Open)),
    }
}

/// Trip the breaker open, reading and incrementing the persisted
/// consecutive-trip counter so the cooldown actually escalates across trips
/// instead of restarting at the 30s floor every time (spec.md §4.4).
pub async fn trip(pool: &PgPool, project_id: &str, provider: &str) -> Result<DateTime<Utc>> {
    let trip_count = breakers::increment_trip_count(pool, project_id, provider).await?;
    let open_until = Utc::now() + cooldown_for_trip_count(trip_count.saturating_sub(1) as u32);
    warn!(provider, trip_count, %open_until, "tripping circuit breaker");
    breakers::trip_open(pool, project_id, provider, open_until).await?;
    Ok(open_until)
}

/// Reset to CLOSED on success while HALF_OPEN (spec.md §4.4).
pub async fn reset(pool: &PgPool, project_id: &str, provider: &str) -> Result<()> {
    breakers::reset_closed(pool, project_id, provider).await
}

/// Classify a dispatch failure from captured stderr/structured output into
/// the signal categories the breaker trips on (spec.md §4.4).
pub fn classify_failure(stderr: &str, raw_output: &str) -> Option<DispatchErrorClass> {
    let haystack = format!("{stderr} {raw_output}").to_lowercase();
    if haystack.contains("rate limit") || haystack.contains("rate_limit") {
        Some(DispatchErrorClass::RateLimit)
    } else if haystack.contains("quota") || haystack.contains("resource_exhausted") {
        Some(DispatchErrorClass::Quota)
    } else if haystack.contains("unauthorized")
        || haystack.contains("auth")
        || haystack.contains("forbidden")
    {
        Some(DispatchErrorClass::Auth)
    } else {
        None
    }
}
