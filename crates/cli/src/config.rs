//! Configuration loading from steward.toml.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use runtime::ProviderRef;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// LLM providers.
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,

    /// MCP tool servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderType {
    #[serde(alias = "OPENAI")]
    Openai,
    #[serde(alias = "AZURE")]
    Azure,
}

/// An OpenAI-compatible LLM endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LlmProviderType,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    /// Azure only.
    pub api_version: Option<String>,
}

/// An MCP server: a child process (`stdio`, `local`) or a remote endpoint
/// (`sse`, `http`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_server_type")]
    pub kind: String,
    /// Program followed by its arguments.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Remote servers only.
    pub url: Option<String>,
    /// `Key: Value` lines sent to remote servers.
    #[serde(default)]
    pub headers: Vec<String>,
}

fn default_server_type() -> String {
    "stdio".to_string()
}

impl ServerConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self.kind.as_str(), "sse" | "http")
    }

    /// Parse `headers` into trimmed `(key, value)` pairs.
    pub fn parsed_headers(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.headers
            .iter()
            .map(|line| {
                let (key, value) = line.split_once(':').ok_or_else(|| ConfigError::InvalidHeader {
                    server: self.name.clone(),
                    header: line.clone(),
                })?;
                Ok((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Name of the LLM provider to use.
    pub provider: String,
    pub system: Option<String>,
    #[serde(default)]
    pub progress: bool,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default)]
    pub servers: Vec<ProviderRef>,
}

fn default_max_tool_rounds() -> usize {
    1
}

impl Config {
    /// Load configuration from a TOML file, substituting `${VAR}` from the
    /// process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let content = substitute_env(&content, |name| std::env::var(name).ok())?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.servers {
            match server.kind.as_str() {
                "stdio" | "local" => {
                    if server.command.first().is_none_or(|c| c.is_empty()) {
                        return Err(ConfigError::EmptyCommand(server.name.clone()));
                    }
                }
                "sse" | "http" => {
                    if server.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                        return Err(ConfigError::MissingUrl(server.name.clone()));
                    }
                    server.parsed_headers()?;
                }
                _ => {
                    return Err(ConfigError::UnsupportedServerType {
                        server: server.name.clone(),
                        kind: server.kind.clone(),
                    });
                }
            }
        }

        let providers: HashSet<&str> = self.providers.iter().map(|p| p.name.as_str()).collect();
        for agent in &self.agents {
            if !providers.contains(agent.provider.as_str()) {
                return Err(ConfigError::UnknownLlmProvider {
                    agent: agent.name.clone(),
                    provider: agent.provider.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&LlmProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Replace every `${VAR}` in `raw` using `lookup`.
fn substitute_env(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep as-is.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("server {server}: unsupported type '{kind}' (expected stdio, local, sse or http)")]
    UnsupportedServerType { server: String, kind: String },

    #[error("server {0}: command is empty")]
    EmptyCommand(String),

    #[error("server {0}: url is required")]
    MissingUrl(String),

    #[error("server {server}: header '{header}' is not 'Key: Value'")]
    InvalidHeader { server: String, header: String },

    #[error("agent {agent}: unknown LLM provider '{provider}'")]
    UnknownLlmProvider { agent: String, provider: String },
}
