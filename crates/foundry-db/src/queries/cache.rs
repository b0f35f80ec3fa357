//! Database query functions for the `validation_cache` table (spec.md §4.8
//! "Cache lookup", §9 "Validation cache", §8 R3).

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::ValidationCacheEntry;

/// Look up a cached `ValidationReport` by criterion + content hash.
pub async fn get_cached(
    pool: &PgPool,
    project_id: &str,
    criterion_hash: &str,
    content_hash: &str,
) -> Result<Option<ValidationCacheEntry>> {
    let entry = sqlx::query_as::<_, ValidationCacheEntry>(
        "SELECT * FROM validation_cache \
         WHERE project_id = $1 AND criterion_hash = $2 AND content_hash = $3",
    )
    .bind(project_id)
    .bind(criterion_hash)
    .bind(content_hash)
    .fetch_optional(pool)
    .await
    .context("failed to look up validation cache")?;

    Ok(entry)
}

/// Write-after-success cache insert (spec.md §5: "The Validation Cache is
/// a read-through, write-after-success cache").
pub async fn put_cached(
    pool: &PgPool,
    project_id: &str,
    criterion_hash: &str,
    content_hash: &str,
    report: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO validation_cache (project_id, criterion_hash, content_hash, report) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (project_id, criterion_hash, content_hash) DO UPDATE SET report = $4",
    )
    .bind(project_id)
    .bind(criterion_hash)
    .bind(content_hash)
    .bind(report)
    .execute(pool)
    .await
    .context("failed to write validation cache entry")?;

    Ok(())
}
