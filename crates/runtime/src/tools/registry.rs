//! Registry of live tool providers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::tools::{NAMESPACE_SEPARATOR, ToolProvider};
use crate::{Error, Result};

/// Live tool providers, keyed by name.
///
/// Built once at startup and shared read-only by every agent.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    ///
    /// Names must be non-empty, unique, and free of the namespace separator,
    /// otherwise namespaced tool names could not be routed back.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) -> Result<()> {
        let name = provider.name().to_string();
        if name.is_empty() {
            return Err(Error::Config("tool provider name is empty".into()));
        }
        if name.contains(NAMESPACE_SEPARATOR) {
            return Err(Error::Config(format!(
                "tool provider name {name:?} must not contain {NAMESPACE_SEPARATOR:?}"
            )));
        }
        if self.providers.contains_key(&name) {
            return Err(Error::Config(format!(
                "tool provider {name:?} registered twice"
            )));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Shut down every provider.
    pub async fn shutdown(&self) {
        for (name, provider) in &self.providers {
            info!(provider = %name, "shutting down tool provider");
            provider.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
