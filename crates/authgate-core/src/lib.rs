//! Client-side session management for bearer-token APIs.
//!
//! This crate provides:
//! - `storage`: durable key/value backends for the session (file, keyring, memory)
//! - `transport`: the async HTTP seam and its reqwest implementation
//! - `auth`: session state and the credential lifecycle (login, register,
//!   refresh, logout, current user)
//! - `gateway`: authenticated requests with one level of refresh-and-retry
//!
//! Everything hangs off an explicit [`AuthClient`] built from a [`Config`]
//! or from caller-supplied [`Storage`] and [`Transport`] implementations.

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod storage;
pub mod transport;

pub use api::{AuthError, HealthStatus, TokenResponse};
pub use auth::{AuthClient, SessionData, SessionState};
pub use config::{Config, Endpoints, StorageBackend};
pub use gateway::{ApiRequest, Gateway};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, Storage};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

#[cfg(test)]
pub(crate) mod test_support;
