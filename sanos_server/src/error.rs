//! Error taxonomy shared by the ingestor, tool surface, agent runner and poller.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanosError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Non-2xx answer from GitHub or Vercel.
    #[error("remote API error {status}: {message}")]
    Remote { status: u16, message: String },

    /// Timeout or connection failure before any response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure inside the reasoning loop itself.
    #[error("reasoning provider error: {0}")]
    ReasoningProvider(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, SanosError>;

impl SanosError {
    /// Taxonomy name used in operator-facing log markers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Remote { .. } => "RemoteError",
            Self::Transport(_) => "TransportError",
            Self::ReasoningProvider(_) => "ReasoningProviderError",
            Self::Database(_) => "DatabaseError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Remote { .. } | Self::Transport(_) | Self::ReasoningProvider(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build a `Remote` error from a failed response body, preferring the
    /// JSON `message` field and falling back to the raw text.
    pub fn remote(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.to_string());
        Self::Remote { status, message }
    }
}

impl From<reqwest::Error> for SanosError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None => Self::Transport(e.to_string()),
        }
    }
}

impl From<diesel::result::Error> for SanosError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for SanosError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        Self::Database(format!("pool: {e}"))
    }
}
