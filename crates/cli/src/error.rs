//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Everything `steward` can fail with; `main` prints it and exits 1.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No agent with this name is configured.
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// The config file could not be read, parsed, or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup or a turn failed inside the runtime.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// Reading the prompt or writing the answer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
