use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::AuthError;
use crate::storage::Storage;

/// Storage key of the bearer token
pub const TOKEN_KEY: &str = "access_token";

/// Storage key of the identity record
pub const USER_KEY: &str = "user_info";

/// Storage key of the token metadata used for the local expiry estimate
pub const META_KEY: &str = "token_meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TokenMeta {
    issued_at: DateTime<Utc>,
    expires_in: i64,
}

/// A complete session: credential plus identity record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub token: String,
    pub user: Value,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_in: Option<i64>,
}

impl SessionData {
    /// Estimated expiry. Informational only: the server's 401 decides.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at?
            .checked_add_signed(Duration::try_seconds(self.expires_in?)?)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at().map(|at| Utc::now() > at).unwrap_or(false)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at()
            .map(|at| (at - Utc::now()).num_minutes().max(0))
    }
}

/// The persisted session, read through on every access.
///
/// A credential without an identity record (or the reverse) counts as no
/// session at all.
#[derive(Clone)]
pub struct SessionState {
    storage: Arc<dyn Storage>,
}

impl SessionState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read session storage");
                None
            }
        }
    }

    fn read_user(&self) -> Option<Value> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => None,
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored identity record is not valid JSON");
                None
            }
        }
    }

    fn read_meta(&self) -> Option<TokenMeta> {
        let raw = self.read(META_KEY)?;
        serde_json::from_str(&raw)
            .map_err(|e| debug!(error = %e, "Ignoring unreadable token metadata"))
            .ok()
    }

    /// Load the session if both halves are present
    pub fn load(&self) -> Option<SessionData> {
        let token = self.read(TOKEN_KEY)?;
        let user = self.read_user()?;
        let meta = self.read_meta();
        Some(SessionData {
            token,
            user,
            issued_at: meta.map(|m| m.issued_at),
            expires_in: meta.map(|m| m.expires_in),
        })
    }

    pub fn has_session(&self) -> bool {
        self.load().is_some()
    }

    pub fn current_credential(&self) -> Option<String> {
        self.load().map(|s| s.token)
    }

    pub fn identity(&self) -> Option<Value> {
        self.load().map(|s| s.user)
    }

    /// Persist a new session, replacing any previous one.
    pub fn save(&self, token: &str, user: &Value, expires_in: i64) -> Result<SessionData, AuthError> {
        let issued_at = Utc::now();
        let user_json =
            serde_json::to_string(user).map_err(|e| AuthError::Persistence(e.to_string()))?;
        let meta_json = serde_json::to_string(&TokenMeta {
            issued_at,
            expires_in,
        })
        .map_err(|e| AuthError::Persistence(e.to_string()))?;

        self.storage
            .set_many(&[
                (TOKEN_KEY, token),
                (USER_KEY, user_json.as_str()),
                (META_KEY, meta_json.as_str()),
            ])
            .map_err(|e| AuthError::Persistence(format!("{:#}", e)))?;

        debug!("Session saved");
        Ok(SessionData {
            token: token.to_string(),
            user: user.clone(),
            issued_at: Some(issued_at),
            expires_in: Some(expires_in),
        })
    }

    /// Remove the session. Clearing an empty session is a no-op.
    pub fn clear(&self) -> Result<(), AuthError> {
        self.storage
            .remove_many(&[TOKEN_KEY, USER_KEY, META_KEY])
            .map_err(|e| AuthError::Persistence(format!("{:#}", e)))?;
        debug!("Session cleared");
        Ok(())
    }
}
