//! Database query functions for the `circuit_breakers` table (spec.md §4.4).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{BreakerState, CircuitBreaker};

/// Fetch a provider's breaker, defaulting to `CLOSED` if no row exists yet
/// (a provider that has never failed has an implicit closed breaker).
pub async fn get_breaker(
    pool: &PgPool,
    project_id: &str,
    provider: &str,
) -> Result<Option<CircuitBreaker>> {
    let breaker = sqlx::query_as::<_, CircuitBreaker>(
        "SELECT * FROM circuit_breakers WHERE project_id = $1 AND provider = $2",
    )
    .bind(project_id)
    .bind(provider)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch breaker for {provider}"))?;

    Ok(breaker)
}

/// Increment and return a provider's consecutive-trip counter (spec.md §4.4:
/// cooldown is "exponential ... per consecutive trip"). Called before the
/// cooldown is computed so the caller knows how long this trip should last;
/// `trip_open` itself leaves the counter untouched so a racing call can't
/// double-count it.
pub async fn increment_trip_count(pool: &PgPool, project_id: &str, provider: &str) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "INSERT INTO circuit_breakers (project_id, provider, state, trip_count, updated_at) \
         VALUES ($1, $2, 'closed', 1, now()) \
         ON CONFLICT (project_id, provider) DO UPDATE SET \
           trip_count = circuit_breakers.trip_count + 1, updated_at = now() \
         RETURNING trip_count",
    )
    .bind(project_id)
    .bind(provider)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to increment trip count for {provider}"))?;

    Ok(row.0)
}

/// Trip the breaker open until `open_until` (spec.md §4.4: "Cooldown:
/// exponential, bounded"). Does not touch `trip_count`; call
/// `increment_trip_count` first to get the count the cooldown was computed
/// from.
pub async fn trip_open(
    pool: &PgPool,
    project_id: &str,
    provider: &str,
    open_until: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO circuit_breakers (project_id, provider, state, open_until, updated_at) \
         VALUES ($1, $2, 'open', $3, now()) \
         ON CONFLICT (project_id, provider) DO UPDATE SET \
           state = 'open', open_until = $3, updated_at = now()",
    )
    .bind(project_id)
    .bind(provider)
    .bind(open_until)
    .execute(pool)
    .await
    .with_context(|| format!("failed to trip breaker for {provider}"))?;

    Ok(())
}

/// Move an `open` breaker to `half_open` once its cooldown has elapsed
/// (called by the dispatcher before evaluating whether a provider is
/// usable this iteration).
pub async fn move_to_half_open(pool: &PgPool, project_id: &str, provider: &str) -> Result<()> {
    sqlx::query(
        "UPDATE circuit_breakers SET state = 'half_open', updated_at = now() \
         WHERE project_id = $1 AND provider = $2 AND state = 'open' AND open_until <= now()",
    )
    .bind(project_id)
    .bind(provider)
    .execute(pool)
    .await
    .with_context(|| format!("failed to half-open breaker for {provider}"))?;

    Ok(())
}

/// Reset to `CLOSED` (spec.md §4.4: "On any success in HALF_OPEN, reset to
/// CLOSED") and clear the consecutive-trip counter, since the streak of
/// trips it tracks just ended.
pub async fn reset_closed(pool: &PgPool, project_id: &str, provider: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO circuit_breakers (project_id, provider, state, open_until, trip_count, updated_at) \
         VALUES ($1, $2, 'closed', NULL, 0, now()) \
         ON CONFLICT (project_id, provider) DO UPDATE SET \
           state = 'closed', open_until = NULL, trip_count = 0, updated_at = now()",
    )
    .bind(project_id)
    .bind(provider)
    .execute(pool)
    .await
    .with_context(|| format!("failed to reset breaker for {provider}"))?;

    Ok(())
}

/// All providers whose breaker is not `closed`, for status reporting.
pub async fn list_non_closed(pool: &PgPool, project_id: &str) -> Result<Vec<CircuitBreaker>> {
    let breakers = sqlx::query_as::<_, CircuitBreaker>(
        "SELECT * FROM circuit_breakers WHERE project_id = $1 AND state <> 'closed' \
         ORDER BY provider",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list open breakers")?;

    Ok(breakers)
}

impl CircuitBreaker {
    pub fn is_closed(&self) -> bool {
        matches!(self.state, BreakerState::Closed)
    }
}
