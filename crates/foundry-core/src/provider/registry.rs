//! A named collection of registered [`super::Provider`] adapters.

use std::collections::HashMap;

use super::Provider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider adapter, replacing any prior registration under
    /// the same name.
    pub fn register(&mut self, provider: impl Provider + 'static) -> Option<Box<dyn Provider>> {
        let name = provider.name().to_string();
        self.providers.insert(name, Box::new(provider))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Provider> {
        self.providers.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::provider::{DispatchOutcome, DispatchRequest};
    use anyhow::Result;
    use async_trait::async_trait;

    struct FakeProvider(&'static str);

    #[async_trait]
    impl super::Provider for FakeProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn dispatch(
            &self,
            _request: &DispatchRequest,
        ) -> Result<DispatchOutcome, DispatchError> {
            unimplemented!("not exercised in registry tests")
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ProviderRegistry::new();
        registry.register(FakeProvider("claude"));
        assert!(registry.get("claude").is_some());
        assert!(registry.get("codex").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = ProviderRegistry::new();
        registry.register(FakeProvider("claude"));
        registry.register(FakeProvider("codex"));
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["claude", "codex"]);
    }

    #[test]
    fn registry_debug_does_not_panic() {
        let mut registry = ProviderRegistry::new();
        registry.register(FakeProvider("claude"));
        let debug = format!("{registry:?}");
        assert!(debug.contains("claude"));
    }
}
