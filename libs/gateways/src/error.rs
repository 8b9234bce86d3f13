//! Error types for gateway calls.

use thiserror::Error;

/// Result alias used by every gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure of a single remote or runtime call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote answered with a non-success status.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be interpreted.
    #[error("decode error: {0}")]
    Decode(String),

    /// A container runtime command failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Stable short code for reports and logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::Http { .. } => "http_status",
            GatewayError::Transport(_) => "transport",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Decode(_) => "decode",
            GatewayError::Runtime(_) => "runtime",
            GatewayError::Io(_) => "io",
        }
    }

    /// Whether the error is a 404 from the remote or an explicit not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::NotFound(_) | GatewayError::Http { status: 404, .. }
        )
    }
}
