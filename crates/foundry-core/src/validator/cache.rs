//! Validation Cache (spec.md §4.8 "Cache lookup", §5 "read-through,
//! write-after-success cache"). Wraps `foundry_db::queries::cache`; this
//! module owns the hashing scheme.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use foundry_db::queries::cache;

/// Stable hash of a criterion's text (spec.md §4.8: keyed on
/// `(project_id, criterion, content hashes of candidate files)`).
pub fn hash_criterion(criterion: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(criterion.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable hash over the concatenated contents of the candidate files,
/// order-independent (files are sorted by path before hashing) so adding a
/// file in a different order doesn't spuriously miss the cache.
pub fn hash_contents(files: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (path, contents) in sorted {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(contents.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Read-through lookup; returns the cached report JSON, if any.
pub async fn lookup(
    pool: &PgPool,
    project_id: &str,
    criterion: &str,
    content_hash: &str,
) -> Result<Option<serde_json::Value>> {
    let criterion_hash = hash_criterion(criterion);
    let entry = cache::get_cached(pool, project_id, &criterion_hash, content_hash).await?;
    Ok(entry.map(|e| e.report))
}

/// Write-after-success: only called once a criterion has been positively
/// resolved by some other means (spec.md §5).
pub async fn store(
    pool: &PgPool,
    project_id: &str,
    criterion: &str,
    content_hash: &str,
    report: &serde_json::Value,
) -> Result<()> {
    let criterion_hash = hash_criterion(criterion);
    cache::put_cached(pool, project_id, &criterion_hash, content_hash, report).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criterion_hash_is_stable() {
        assert_eq!(hash_criterion("has a login handler"), hash_criterion("has a login handler"));
        assert_ne!(hash_criterion("has a login handler"), hash_criterion("has a logout handler"));
    }

    #[test]
    fn content_hash_is_order_independent() {
        let a = vec![("b.rs".to_string(), "B".to_string()), ("a.rs".to_string(), "A".to_string())];
        let b = vec![("a.rs".to_string(), "A".to_string()), ("b.rs".to_string(), "B".to_string())];
        assert_eq!(hash_contents(&a), hash_contents(&b));
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = vec![("a.rs".to_string(), "A".to_string())];
        let b = vec![("a.rs".to_string(), "B".to_string())];
        assert_ne!(hash_contents(&a), hash_contents(&b));
    }
}
