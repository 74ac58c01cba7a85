//! Error taxonomy for the dispatch core.
//!
//! Every failure that can surface during routing, binding, plugin
//! evaluation, or handler execution is expressed as an [`HttpError`].
//! The dispatcher funnels all of them through a single fail path that
//! maps the error onto an HTTP status and response body:
//!
//! ```text
//! BadRequest       → 400  message
//! Unauthorized     → 401  message
//! NotFound         → 404  message
//! TooManyRequests  → 429  message
//! Http{status,..}  → status  message
//! Internal         → 500  generic body, detail logged only
//! ```

use tracing::error;

/// The closed error taxonomy of the dispatch core.
///
/// Errors are `Clone` because a terminal task outcome is cached and
/// replayed to every handler installed after completion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    /// Missing or malformed argument, bad query syntax, unreadable body.
    #[error("{0}")]
    BadRequest(String),

    /// Rejected by an authorization plugin.
    #[error("{0}")]
    Unauthorized(String),

    /// No route matched, or a handler reported an explicit miss.
    #[error("{0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("{0}")]
    TooManyRequests(String),

    /// Handler-chosen status code with a caller-visible message.
    #[error("[{status}] {message}")]
    Http { status: u16, message: String },

    /// Anything else. The detail is logged, never returned to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HttpError {
    /// Status code this error maps to on the wire.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::BadRequest(_) => 400,
            HttpError::Unauthorized(_) => 401,
            HttpError::NotFound(_) => 404,
            HttpError::TooManyRequests(_) => 429,
            HttpError::Http { status, .. } => *status,
            HttpError::Internal(_) => 500,
        }
    }

    /// The body text sent to the client.
    ///
    /// `Internal` errors log their detail and return a generic body so
    /// server internals never leak onto the wire.
    pub fn public_message(&self) -> String {
        match self {
            HttpError::BadRequest(msg)
            | HttpError::Unauthorized(msg)
            | HttpError::NotFound(msg)
            | HttpError::TooManyRequests(msg) => msg.clone(),
            HttpError::Http { message, .. } => message.clone(),
            HttpError::Internal(detail) => {
                error!(detail = %detail, "internal error during dispatch");
                "internal server error".to_string()
            }
        }
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(e: serde_json::Error) -> Self {
        HttpError::BadRequest(format!("invalid JSON: {}", e))
    }
}
