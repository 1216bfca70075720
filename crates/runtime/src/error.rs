//! Error types for the endpoint runtime.
//!
//! Retry and teardown decisions elsewhere in the workspace branch on the
//! kind helpers defined here, never on message substrings. Classification of
//! raw endpoint payloads into kinds happens once, in the connection layer.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the automation endpoint.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to establish a connection with the endpoint.
    #[error("failed to connect to automation endpoint: {0}")]
    ConnectionFailed(String),

    /// Transport-level error (WebSocket or pipe framing).
    #[error("transport error: {0}")]
    TransportError(String),

    /// Protocol-level error (unexpected message shape).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Error reported by the remote endpoint for a specific command.
    #[error("endpoint error {code}: {message}")]
    Remote { code: i64, message: String },

    /// Timeout waiting for an operation.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The target (browser, page) backing an operation is gone.
    #[error("target closed: {context}")]
    TargetClosed { context: String },

    /// JavaScript evaluation threw in the page.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Element not found by selector.
    #[error("element not found: selector '{0}'")]
    ElementNotFound(String),

    /// Connection closed while a command was outstanding.
    #[error("connection closed unexpectedly")]
    ChannelClosed,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns `true` if this is a target-closed error.
    pub fn is_target_closed(&self) -> bool {
        matches!(self, Error::TargetClosed { .. })
    }

    /// Returns `true` when the underlying session is unusable and must be
    /// torn down rather than retried in place.
    pub fn is_session_dead(&self) -> bool {
        matches!(
            self,
            Error::TargetClosed { .. }
                | Error::ChannelClosed
                | Error::ConnectionFailed(_)
                | Error::TransportError(_)
        )
    }
}
