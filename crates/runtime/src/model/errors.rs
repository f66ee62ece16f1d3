use thiserror::Error;

/// Failures of one model call, blocking or streaming.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request never got a response (connect, timeout, broken stream).
    #[error("network: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("model api: {0}")]
    Api(String),

    /// The body or a stream chunk did not have the expected shape.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// The fragment sink refused a fragment, so generation stopped.
    #[error("generation aborted: {0}")]
    Aborted(String),
}
