use thiserror::Error;

/// Errors a tool provider reports when it cannot complete a request.
///
/// A tool that ran and signalled failure is not a `ToolError`; providers
/// return that as part of their structured result.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("serialize result: {0}")]
    Serialize(String),
}
