//! Wire contract with the auth service.
//!
//! This module provides the typed request/response bodies for the auth
//! endpoints and the `AuthError` taxonomy every public operation reports.
//!
//! Server payloads are validated here, at the boundary, so the session layer
//! only ever sees complete token responses.

pub mod error;
pub mod wire;

pub use error::{AuthError, NETWORK_ERROR_MESSAGE};
pub use wire::{HealthStatus, TokenResponse};
