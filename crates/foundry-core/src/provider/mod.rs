//! Provider Dispatcher (spec.md §4.5).
//!
//! `Provider` is the adapter interface for a headless coding-agent CLI,
//! modeled the same way the base crate models its agent-runtime adapters:
//! an object-safe trait stored as `Box<dyn Provider>` in a name-keyed
//! registry, so the dispatcher can iterate a priority list without knowing
//! concrete provider types.

pub mod cli;
pub mod registry;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use registry::ProviderRegistry;
pub use types::{DispatchOutcome, DispatchRequest, Usage};

use crate::error::DispatchError;

/// Adapter interface for a single provider CLI.
///
/// # Object Safety
///
/// Every method returns a concrete type, so `Box<dyn Provider>` is valid
/// and can be stored in [`ProviderRegistry`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name this provider is registered and selected under (matches
    /// `PROVIDER_PRIORITY` entries and `CONTEXT_LIMIT_<provider>` keys).
    fn name(&self) -> &str;

    /// Invoke the provider once and capture its full output (spec.md §4.5
    /// step 2). Implementations never retry internally; failover across
    /// providers is the dispatcher's job.
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};
