//! Per-agent tool catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::ToolSpec;
use crate::tools::{NAMESPACE_SEPARATOR, ProviderRegistry, ToolProvider, namespaced};

/// A provider an agent may use, with the subset of its tools it is allowed.
///
/// An empty `allowed_tools` list allows every tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub name: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

impl ProviderRef {
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed_tools: Vec::new(),
        }
    }

    pub fn only<I, S>(name: impl Into<String>, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            allowed_tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// The tools one agent can call, grouped by provider.
///
/// Built once when the agent is constructed and read-only afterwards.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    providers: BTreeMap<String, Arc<dyn ToolProvider>>,
    tools: BTreeMap<String, Vec<ToolSpec>>,
    definitions: Vec<ToolSpec>,
}

impl ToolCatalog {
    /// Query every referenced provider and keep the allowed tools.
    ///
    /// Missing providers and failed listings are logged and contribute no
    /// tools; building never fails.
    pub async fn build(refs: &[ProviderRef], registry: &ProviderRegistry) -> Self {
        let mut catalog = Self::default();

        for provider_ref in refs {
            let Some(provider) = registry.get(&provider_ref.name) else {
                warn!(provider = %provider_ref.name, "tool provider not found, skipping");
                continue;
            };
            catalog
                .providers
                .insert(provider_ref.name.clone(), provider.clone());

            let listed = match provider.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(provider = %provider_ref.name, error = %e, "failed to list tools");
                    continue;
                }
            };

            let allowed: Vec<ToolSpec> = listed
                .into_iter()
                .filter(|tool| provider_ref.allows(&tool.name))
                .filter(|tool| {
                    let valid = !tool.name.contains(NAMESPACE_SEPARATOR);
                    if !valid {
                        warn!(
                            provider = %provider_ref.name,
                            tool = %tool.name,
                            "tool name contains namespace separator, skipping"
                        );
                    }
                    valid
                })
                .collect();

            let names: Vec<&str> = allowed.iter().map(|t| t.name.as_str()).collect();
            info!(provider = %provider_ref.name, tools = %names.join(", "), "allowed tools");

            catalog
                .tools
                .entry(provider_ref.name.clone())
                .or_default()
                .extend(allowed);
        }

        catalog.definitions = catalog.flatten();
        catalog
    }

    fn flatten(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .flat_map(|(provider, tools)| {
                tools.iter().map(move |tool| ToolSpec {
                    name: namespaced(provider, &tool.name),
                    description: tool.description.clone(),
                    schema: tool.schema.clone(),
                })
            })
            .collect()
    }

    /// Namespaced tool definitions to advertise to the model.
    pub fn definitions(&self) -> &[ToolSpec] {
        &self.definitions
    }

    /// Allowed tools of one provider, with local names.
    pub fn tools(&self, provider: &str) -> &[ToolSpec] {
        self.tools.get(provider).map(Vec::as_slice).unwrap_or_default()
    }

    /// Provider handle used to route a call.
    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.providers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.definitions.iter().map(|t| t.name.as_str()).collect();
        f.debug_struct("ToolCatalog").field("tools", &names).finish()
    }
}
