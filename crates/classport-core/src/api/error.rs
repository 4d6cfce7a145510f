use thiserror::Error;

use super::transport::TransportError;

/// Failure modes of the credential renewal exchange.
///
/// Clone-able so a single renewal outcome can be handed to every caller
/// awaiting the shared in-flight exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewError {
    #[error("no renewal credential available")]
    MissingCredential,

    #[error("renewal rejected by server: {0}")]
    Rejected(String),

    #[error("network error during renewal: {0}")]
    Network(String),

    #[error("malformed renewal response: {0}")]
    Malformed(String),

    #[error("failed to persist renewed credentials: {0}")]
    Storage(String),
}

/// Why a session was torn down.
#[derive(Error, Debug, Clone)]
pub enum SessionEndReason {
    #[error("credential renewal failed: {0}")]
    RenewalFailed(RenewError),

    #[error("credential rejected again after renewal")]
    RetryRejected,

    #[error("renewal endpoint rejected the credential")]
    RenewalRejected,

    #[error("logged out")]
    LoggedOut,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("unauthorized - credential missing or rejected")]
    Unauthorized,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("{message}")]
    Application {
        message: String,
        code: Option<String>,
    },

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("session ended: {0}")]
    SessionEnded(SessionEndReason),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("status {}: {}", status, truncated)),
        }
    }
}
