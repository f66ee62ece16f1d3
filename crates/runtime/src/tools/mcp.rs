//! MCP (Model Context Protocol) tool provider.
//!
//! Connects to an MCP server using the official rmcp SDK, either by spawning
//! it as a child process (stdio) or over streamable HTTP, and exposes it
//! through [`ToolProvider`].
//!
//! # Example
//!
//! ```ignore
//! use runtime::{McpProvider, McpServerConfig, ToolProvider};
//!
//! # async fn example() -> Result<(), runtime::ToolError> {
//! let config = McpServerConfig::new("fs", "mcp-server-filesystem").arg("/tmp");
//! let provider = McpProvider::spawn(config).await?;
//!
//! for tool in provider.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use mcp_reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, Tool},
    service::{RoleClient, RunningService},
    transport::{
        ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::model::ToolSpec;
use crate::tools::{ToolError, ToolProvider};

/// How to launch an MCP server over stdio.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How to reach a remote MCP server over HTTP.
#[derive(Debug, Clone)]
pub struct McpHttpConfig {
    pub name: String,
    pub url: String,
    /// Sent with every request.
    pub headers: Vec<(String, String)>,
}

impl McpHttpConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// A tool provider backed by an MCP server, local or remote.
pub struct McpProvider {
    name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpProvider {
    /// Spawn the server and complete the MCP handshake.
    pub async fn spawn(config: McpServerConfig) -> Result<Self, ToolError> {
        let McpServerConfig {
            name,
            command,
            args,
            env,
        } = config;

        let transport = TokioChildProcess::new(Command::new(&command).configure(|cmd| {
            cmd.args(&args).envs(&env);
        }))
        .map_err(|e| ToolError::Transport(format!("spawn {command}: {e}")))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ToolError::Protocol(format!("initialize {name}: {e}")))?;

        info!(server = %name, command = %command, "MCP server started");
        Ok(Self { name, service })
    }

    /// Connect to a remote server and complete the MCP handshake.
    pub async fn connect(config: McpHttpConfig) -> Result<Self, ToolError> {
        let McpHttpConfig { name, url, headers } = config;

        let client = mcp_reqwest::Client::builder()
            .default_headers(header_map(&headers)?)
            .build()
            .map_err(|e| ToolError::Transport(format!("http client for {name}: {e}")))?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(url.as_str()),
        );

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ToolError::Protocol(format!("initialize {name}: {e}")))?;

        info!(server = %name, url = %url, headers = headers.len(), "MCP server connected");
        Ok(Self { name, service })
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, ToolError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ToolError::Transport(format!("header name {key:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ToolError::Transport(format!("header {key}: {e}")))?;
        // Later duplicates win.
        map.insert(name, value);
    }
    Ok(map)
}

fn tool_to_spec(tool: Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name.to_string(),
        description: tool.description.as_deref().unwrap_or_default().to_string(),
        schema: Value::Object(tool.input_schema.as_ref().clone()),
    }
}

/// MCP requires call arguments to be an object (or absent).
fn arguments_to_object(
    arguments: Option<Value>,
) -> Result<Option<serde_json::Map<String, Value>>, ToolError> {
    match arguments {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(ToolError::Protocol(format!(
            "arguments must be a JSON object, got {other}"
        ))),
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let response = self
            .service
            .list_tools(Default::default())
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        Ok(response.tools.into_iter().map(tool_to_spec).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ToolError> {
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: arguments_to_object(arguments)?,
            meta: None,
            task: None,
        };

        debug!(server = %self.name, tool = %name, "calling MCP tool");
        let result = self
            .service
            .call_tool(params)
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;

        // isError results stay in the payload so the model sees them.
        serde_json::to_value(&result).map_err(|e| ToolError::Serialize(e.to_string()))
    }

    async fn shutdown(&self) {
        info!(server = %self.name, "stopping MCP server");
        self.service.cancellation_token().cancel();
    }
}
