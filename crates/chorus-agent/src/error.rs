//! Error types for chorus-agent

use thiserror::Error;

/// Result type alias using chorus-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by supervisor and registry operations.
///
/// Failures inside a running request never surface here; they end the
/// request with an `Error` event instead.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] chorus_ai::Error),

    /// The start request was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A request with this id is already active
    #[error("Request {0} is already active")]
    DuplicateRequest(String),

    /// No active request with this id
    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    /// No tool call is awaiting a result for this request
    #[error("No pending tool call for request {0}")]
    NoPendingToolCall(String),

    /// The model asked for a tool the registry does not have
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments failed schema validation
    #[error("{0}")]
    InvalidToolParameters(String),
}
