//! Test-only helpers shared across this crate's `#[cfg(test)]` modules.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Env vars are process-global; serialize tests that mutate
/// `FOUNDRY_DATABASE_URL` so they don't race each other.
pub fn lock_env() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
