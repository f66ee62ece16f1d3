use crate::model::ModelError;
use crate::tools::ToolError;
use thiserror::Error;

/// Errors that abort a turn.
///
/// Application-level tool failures are not errors: they are serialized into
/// the tool result so the model can react to them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid arguments for tool {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown tool provider for tool: {0}")]
    UnknownProvider(String),

    /// The provider exists but the tool is not in the agent's catalog.
    #[error("tool not allowed: {0}")]
    ToolNotAllowed(String),

    #[error("tool {tool} failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    #[error("generation failed: {0}")]
    Generation(#[from] ModelError),

    /// A tool provider failed outside of a tool call, e.g. while starting.
    #[error("tool provider: {0}")]
    Provider(#[from] ToolError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
