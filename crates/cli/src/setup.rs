//! Builds the live runtime from configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use runtime::{
    Agent, AgentOptions, McpHttpConfig, McpProvider, McpServerConfig, OpenAiBackend,
    ProviderRegistry, ToolCatalog,
};
use tracing::{info, warn};

use crate::config::{Config, LlmProviderType, ServerConfig};
use crate::error::{Error, Result};

/// Backends, tool servers, and agents started from one config.
pub struct Runtime {
    registry: ProviderRegistry,
    agents: BTreeMap<String, Agent<OpenAiBackend>>,
}

impl Runtime {
    /// Start every MCP server and build every agent.
    ///
    /// A server that fails to start aborts startup; servers already started
    /// are shut down first.
    pub async fn start(config: &Config) -> Result<Self> {
        let backends: HashMap<&str, Arc<OpenAiBackend>> = config
            .providers
            .iter()
            .map(|provider| {
                let mut builder = OpenAiBackend::builder(&provider.api_key, &provider.model);
                if let Some(url) = &provider.base_url {
                    builder = builder.base_url(url);
                }
                if provider.kind == LlmProviderType::Azure {
                    builder = builder.azure(provider.api_version.clone());
                }
                let backend = builder.build();
                info!(provider = %provider.name, backend = %backend, "LLM provider ready");
                (provider.name.as_str(), Arc::new(backend))
            })
            .collect();

        let mut registry = ProviderRegistry::new();
        for server in &config.servers {
            if let Err(e) = start_server(server, &mut registry).await {
                warn!(server = %server.name, error = %e, "MCP server failed to start");
                registry.shutdown().await;
                return Err(e);
            }
        }

        let mut agents = BTreeMap::new();
        for agent in &config.agents {
            let backend = backends.get(agent.provider.as_str()).cloned().ok_or_else(|| {
                runtime::Error::Config(format!(
                    "agent {}: unknown LLM provider '{}'",
                    agent.name, agent.provider
                ))
            })?;
            let catalog = ToolCatalog::build(&agent.servers, &registry).await;
            info!(agent = %agent.name, tools = catalog.definitions().len(), "agent ready");

            let options = AgentOptions {
                system: agent.system.clone(),
                progress: agent.progress,
                max_tool_rounds: agent.max_tool_rounds,
                ..AgentOptions::default()
            };
            agents.insert(
                agent.name.clone(),
                Agent::new(&agent.name, backend, catalog).with_options(options),
            );
        }

        Ok(Self { registry, agents })
    }

    pub fn agent(&self, name: &str) -> Result<&Agent<OpenAiBackend>> {
        self.agents
            .get(name)
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Stop every tool server.
    pub async fn shutdown(self) {
        self.registry.shutdown().await;
    }
}

async fn start_server(server: &ServerConfig, registry: &mut ProviderRegistry) -> Result<()> {
    let provider = if server.is_remote() {
        connect_server(server).await?
    } else {
        spawn_server(server).await?
    };
    registry.register(Arc::new(provider))?;
    info!(server = %server.name, kind = %server.kind, "MCP server started");
    Ok(())
}

async fn connect_server(server: &ServerConfig) -> Result<McpProvider> {
    let Some(url) = &server.url else {
        return Err(
            runtime::Error::Config(format!("server {}: url is required", server.name)).into(),
        );
    };

    let mut mcp = McpHttpConfig::new(&server.name, url);
    for (key, value) in server.parsed_headers()? {
        mcp = mcp.header(key, value);
    }
    Ok(McpProvider::connect(mcp).await.map_err(runtime::Error::from)?)
}

async fn spawn_server(server: &ServerConfig) -> Result<McpProvider> {
    let Some((command, args)) = server.command.split_first() else {
        return Err(runtime::Error::Config(format!("server {}: command is empty", server.name)).into());
    };

    let mut mcp = McpServerConfig::new(&server.name, command);
    for arg in args {
        mcp = mcp.arg(arg);
    }
    for (key, value) in &server.env {
        mcp = mcp.env(key, value);
    }

    Ok(McpProvider::spawn(mcp).await.map_err(runtime::Error::from)?)
}
