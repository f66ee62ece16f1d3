//! Tool call execution.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::tools::{ToolCatalog, split_name};
use crate::{Error, Result};

/// Default number of characters of a tool result shown in progress output.
pub const DISPLAY_CAP: usize = 1000;

/// Routes namespaced tool calls to the providers of one catalog.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    catalog: Arc<ToolCatalog>,
}

impl ToolInvoker {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    /// Execute a namespaced tool with raw JSON arguments.
    ///
    /// Returns the provider's structured result serialized as JSON text.
    /// Results the tool flagged as errors are returned as `Ok`.
    pub async fn execute(&self, name: &str, arguments_json: &str) -> Result<String> {
        let arguments = parse_arguments(arguments_json).map_err(|source| {
            Error::InvalidArguments {
                tool: name.to_string(),
                source,
            }
        })?;

        let (provider_name, tool) =
            split_name(name).ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        let provider = self
            .catalog
            .provider(provider_name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        if !self.catalog.tools(provider_name).iter().any(|t| t.name == tool) {
            return Err(Error::ToolNotAllowed(name.to_string()));
        }

        info!(provider = %provider_name, tool = %tool, "executing tool");
        let result = provider
            .call_tool(tool, arguments)
            .await
            .map_err(|e| Error::ToolExecutionFailed {
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let text = serde_json::to_string(&result).map_err(|e| Error::ToolExecutionFailed {
            tool: name.to_string(),
            message: format!("serialize result: {e}"),
        })?;
        debug!(tool = %name, bytes = text.len(), "tool finished");
        Ok(text)
    }
}

/// Parse raw tool arguments.
///
/// Empty text and `{}` mean "no arguments".
pub fn parse_arguments(raw: &str) -> std::result::Result<Option<Value>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Shorten `text` to at most `cap` characters for display, marking the cut.
pub fn truncate_for_display(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
