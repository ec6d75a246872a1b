//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionState`: the persisted (credential, identity) pair
//! - `AuthClient`: login, register, refresh, logout and current-user flows
//!
//! Refresh is single-flight: concurrent callers share one network call.

pub mod client;
pub mod session;

pub use client::AuthClient;
pub use session::{SessionData, SessionState};

use std::fmt::Display;
use std::future::Future;

use reqwest::header::HeaderValue;
use tracing::warn;

use crate::api::AuthError;

/// Run `fut` for its side effect only: a failure is logged and dropped.
pub async fn best_effort<F, T, E>(operation: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Ignoring failed best-effort operation");
            None
        }
    }
}

/// `Authorization: Bearer <token>` value
pub(crate) fn bearer_header(token: &str) -> Result<HeaderValue, AuthError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        warn!("Stored credential is not a valid header value");
        AuthError::NotAuthenticated
    })?;
    value.set_sensitive(true);
    Ok(value)
}
