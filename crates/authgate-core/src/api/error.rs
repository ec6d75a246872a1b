use reqwest::StatusCode;
use thiserror::Error;

use crate::transport::TransportError;

use super::wire::ErrorBody;

/// Generic message for anything that never reached the server
pub const NETWORK_ERROR_MESSAGE: &str = "Network error, please try again later";

/// Failures surfaced by session operations.
///
/// Clone so that one refresh outcome can be handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server answered with a non-success status
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// No response from the server (unreachable, timeout, cancelled)
    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network(#[source] TransportError),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Authentication expired, please log in again")]
    SessionExpired,

    #[error("Invalid response from server: {0}")]
    MalformedResponse(String),

    #[error("Failed to persist session: {0}")]
    Persistence(String),
}

/// Maximum length for response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build a rejection from a non-success response, preferring the server's
    /// `detail` message over `fallback`.
    pub fn from_status(status: StatusCode, body: &str, fallback: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message())
            .unwrap_or_else(|| fallback.to_string());
        AuthError::Rejected {
            status: status.as_u16(),
            message,
        }
    }

    pub fn malformed(reason: &str, body: &str) -> Self {
        AuthError::MalformedResponse(format!("{} (body: {})", reason, Self::truncate_body(body)))
    }

    /// HTTP status of a server rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures where the server never answered
    pub fn is_network(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        AuthError::Network(err)
    }
}
