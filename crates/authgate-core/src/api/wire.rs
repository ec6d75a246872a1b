//! Request and response bodies exchanged with the auth endpoints.

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::AuthError;

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of a successful login, register or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Token lifetime in seconds, when the server reports one
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: Value,
}

impl TokenResponse {
    /// Parse and validate a token body. An empty token or a null user record
    /// would leave a half session behind, so both are rejected here.
    pub(crate) fn parse(body: &str) -> Result<Self, AuthError> {
        let parsed: TokenResponse =
            serde_json::from_str(body).map_err(|e| AuthError::malformed(&e.to_string(), body))?;

        if parsed.access_token.trim().is_empty() {
            return Err(AuthError::malformed("empty access_token", body));
        }
        if HeaderValue::from_str(&parsed.access_token).is_err() {
            return Err(AuthError::malformed("access_token is not a valid header value", body));
        }
        if parsed.user.is_null() {
            return Err(AuthError::malformed("null user record", body));
        }
        if let Some(ref kind) = parsed.token_type {
            if !kind.eq_ignore_ascii_case("bearer") {
                warn!(token_type = %kind, "Unexpected token type, treating as bearer");
            }
        }
        Ok(parsed)
    }
}

/// Error body. `detail` is usually a string; request validation failures
/// send a list of `{loc, msg, type}` objects instead.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Array(items) => items
                .iter()
                .find_map(|item| item.get("msg").and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        }
    }
}

/// Auth service health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub database_connected: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
