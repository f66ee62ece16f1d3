//! Tool providers, catalogs, and execution.

pub mod catalog;
pub mod errors;
pub mod invoker;
mod mcp;
mod provider;
pub mod registry;

pub use catalog::{ProviderRef, ToolCatalog};
pub use errors::ToolError;
pub use invoker::ToolInvoker;
pub use mcp::{McpHttpConfig, McpProvider, McpServerConfig};
pub use provider::ToolProvider;
pub use registry::ProviderRegistry;

/// Separator between provider and tool in a namespaced tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Build the name a tool is advertised under.
pub fn namespaced(provider: &str, tool: &str) -> String {
    format!("{provider}{NAMESPACE_SEPARATOR}{tool}")
}

/// Split a namespaced tool name into `(provider, tool)` at the first separator.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEPARATOR)
}
