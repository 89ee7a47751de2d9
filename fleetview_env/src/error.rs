//! Error types for the dispatch backend boundary.

use thiserror::Error;

/// Errors that can occur while talking to the dispatch backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connection refused, reset, DNS failure, etc.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status code
    #[error("Backend returned status {code} for {path}")]
    Status { code: u16, path: String },

    /// The body was not the JSON shape the call promises
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Request did not complete in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl ApiError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a malformed-response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Creates a status error for the given request path.
    pub fn status(code: u16, path: impl Into<String>) -> Self {
        Self::Status {
            code,
            path: path.into(),
        }
    }

    /// True for failures of the network path itself (as opposed to bad data).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. } | Self::Timeout(_))
    }
}
