//! Steward runtime: tool-augmented LLM agents.
//!
//! The runtime answers conversation turns with an LLM that can call tools
//! exposed by external tool providers (MCP servers).
//!
//! # Overview
//!
//! - **ToolProvider**: an external source of tools, such as an MCP server.
//! - **ToolCatalog**: the tools one agent may use, advertised under namespaced
//!   names (`provider__tool`).
//! - **ToolInvoker**: routes a namespaced call back to its provider.
//! - **Agent**: runs one turn, blocking or streaming, executing the tools the
//!   model asks for.
//! - **Backend**: a trait abstracting LLM providers (OpenAI, Azure OpenAI).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use runtime::{Agent, McpProvider, McpServerConfig, Message, OpenAiBackend};
//! use runtime::{ProviderRef, ProviderRegistry, ToolCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> runtime::Result<()> {
//! let calc = McpProvider::spawn(McpServerConfig::new("calc", "calc-mcp")).await?;
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(calc))?;
//!
//! let catalog = ToolCatalog::build(&[ProviderRef::all("calc")], &registry).await;
//! let backend = Arc::new(OpenAiBackend::builder("sk-...", "gpt-4o-mini").build());
//! let agent = Agent::new("math", backend, catalog);
//!
//! let reply = agent
//!     .respond(&[Message::human("What's 2+2?")], &CancellationToken::new())
//!     .await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod classify;
mod error;
pub mod model;
pub mod providers;
pub mod tools;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentOptions, Reply, TurnStream};
pub use classify::{FragmentClassifier, ToolDeltaClassifier, Verdict};
pub use error::{Error, Result};
pub use model::{
    Backend, Message, ModelError, Part, Role, ToolCall, ToolResult, ToolSpec, Usage,
};
pub use providers::{Flavor, OpenAiBackend};
pub use tools::{
    McpHttpConfig, McpProvider, McpServerConfig, ProviderRef, ProviderRegistry, ToolCatalog,
    ToolError, ToolInvoker, ToolProvider,
};
