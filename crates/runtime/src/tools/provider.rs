//! Tool provider trait.

use crate::model::ToolSpec;
use crate::tools::ToolError;
use async_trait::async_trait;
use serde_json::Value;

/// A source of callable tools, such as an MCP server.
///
/// This is the boundary between the orchestration loop and side effects.
/// Tool names here are local to the provider; namespacing is applied by the
/// catalog and stripped again by the invoker.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name under which the provider is registered.
    fn name(&self) -> &str;

    /// List every tool the provider exposes.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Call a tool by its local name.
    ///
    /// `Ok` carries the provider's structured result, including results the
    /// tool itself flagged as errors.
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ToolError>;

    /// Release the provider's resources.
    async fn shutdown(&self) {}
}
