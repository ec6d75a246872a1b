//! Credential lifecycle: the flows that create, replace and destroy a session.
//!
//! ```text
//! ANONYMOUS --login/register ok--> AUTHENTICATED
//! AUTHENTICATED --refresh ok--> AUTHENTICATED (credential replaced)
//! AUTHENTICATED --refresh fails--> ANONYMOUS
//! AUTHENTICATED --logout--> ANONYMOUS
//! ```

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{self, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::wire::{LoginRequest, RegisterRequest};
use crate::api::{AuthError, HealthStatus, TokenResponse};
use crate::config::Config;
use crate::gateway::Gateway;
use crate::storage::Storage;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

use super::session::{SessionData, SessionState};
use super::{bearer_header, best_effort};

const LOGIN_FAILED: &str = "Login failed";
const REGISTER_FAILED: &str = "Registration failed";
const REFRESH_FAILED: &str = "Token refresh failed, please log in again";
const SESSION_REJECTED: &str = "Authentication expired, please log in again";
const HEALTH_FAILED: &str = "Health check failed";

type RefreshFuture = Shared<BoxFuture<'static, Result<SessionData, AuthError>>>;

/// A refresh running in its own task, keyed by the credential it exchanges.
struct InFlight {
    credential: String,
    refresh: RefreshFuture,
}

/// Session context for one user of one API.
///
/// Clone is cheap and every clone shares the same session, transport and
/// in-flight refresh.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    session: SessionState,
    transport: Arc<dyn Transport>,
    refresh_in_flight: Mutex<Option<InFlight>>,
}

impl AuthClient {
    pub fn new(config: Config, storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                session: SessionState::new(storage),
                transport,
                refresh_in_flight: Mutex::new(None),
            }),
        }
    }

    /// Build the configured storage backend and an HTTP transport
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let storage = config.open_storage()?;
        let transport = Arc::new(config.build_transport()?);
        Ok(Self::new(config, storage, transport))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn has_session(&self) -> bool {
        self.inner.session.has_session()
    }

    /// Gateway for authenticated requests against this session
    pub fn gateway(&self) -> Gateway {
        Gateway::new(self.clone())
    }

    pub(crate) async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        self.inner.send(request).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let body = LoginRequest { username, password };
        let token = self
            .inner
            .post_credentials(&self.inner.config.endpoints.login, &body, LOGIN_FAILED)
            .await?;
        info!(username, "Login successful");
        Ok(token)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<TokenResponse, AuthError> {
        let body = RegisterRequest {
            username,
            email,
            password,
        };
        let token = self
            .inner
            .post_credentials(&self.inner.config.endpoints.register, &body, REGISTER_FAILED)
            .await?;
        info!(username, "Registration successful");
        Ok(token)
    }

    /// Notify the server (best effort) and drop the local session.
    ///
    /// The session is cleared even if the notification fails or this future
    /// is dropped part-way through.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let guard = ClearOnDrop::new(&self.inner.session);

        if let Some(token) = self.inner.session.current_credential() {
            let notify = async {
                let request = self.inner.bearer_request(
                    Method::POST,
                    &self.inner.config.endpoints.logout,
                    &token,
                )?;
                let response = self.inner.send(request).await?;
                if response.is_success() {
                    Ok::<(), AuthError>(())
                } else {
                    Err(AuthError::from_status(response.status, &response.body, "Logout rejected"))
                }
            };
            best_effort("logout notification", notify).await;
        }

        guard.disarm();
        self.inner.session.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Exchange the current credential for a new one.
    ///
    /// Concurrent calls for the same credential share a single refresh
    /// request and all observe its outcome. The request runs in its own task,
    /// so it completes even if every caller is dropped. Any failure clears the
    /// session, unless the session was replaced while the request was out.
    pub async fn refresh_credential(&self) -> Result<SessionData, AuthError> {
        let refresh = {
            let mut slot = self.inner.refresh_in_flight.lock().await;
            let Some(credential) = self.inner.session.current_credential() else {
                self.inner.clear_quietly();
                return Err(AuthError::NotAuthenticated);
            };
            match slot.as_ref() {
                Some(in_flight) if in_flight.credential == credential => {
                    debug!("Joining in-flight refresh");
                    in_flight.refresh.clone()
                }
                _ => {
                    let refresh = self.inner.spawn_refresh(credential.clone());
                    *slot = Some(InFlight {
                        credential,
                        refresh: refresh.clone(),
                    });
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Refresh after the server rejected `rejected`. If another flow has
    /// already replaced that credential, the replacement is used as is.
    pub(crate) async fn refresh_after_rejection(&self, rejected: &str) -> Result<SessionData, AuthError> {
        if let Some(current) = self.inner.session.load() {
            if current.token != rejected {
                debug!("Credential already replaced by another request");
                return Ok(current);
            }
        }
        self.refresh_credential().await
    }

    /// Ask the server who the current credential belongs to.
    ///
    /// A rejection clears the session; a network failure leaves it alone.
    pub async fn get_current_user(&self) -> Result<Value, AuthError> {
        let token = self
            .inner
            .session
            .current_credential()
            .ok_or(AuthError::NotAuthenticated)?;
        let request = self
            .inner
            .bearer_request(Method::GET, &self.inner.config.endpoints.me, &token)?;
        let response = self.inner.send(request).await?;

        if response.status != StatusCode::OK {
            warn!(status = response.status.as_u16(), "Credential rejected, clearing session");
            self.inner.clear_quietly();
            return Err(AuthError::Rejected {
                status: response.status.as_u16(),
                message: SESSION_REJECTED.to_string(),
            });
        }
        response.json()
    }

    pub async fn health(&self) -> Result<HealthStatus, AuthError> {
        let url = self.inner.config.url(&self.inner.config.endpoints.health);
        let response = self.inner.send(HttpRequest::new(Method::GET, url)).await?;
        if !response.is_success() {
            return Err(AuthError::from_status(response.status, &response.body, HEALTH_FAILED));
        }
        response.json()
    }
}

impl Inner {
    /// Send through the transport, logging and converting transport failures
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let method = request.method.clone();
        let url = request.url.clone();
        self.transport.send(request).await.map_err(|e| {
            warn!(%method, %url, error = %e, "Request failed");
            AuthError::from(e)
        })
    }

    fn bearer_request(&self, method: Method, path: &str, token: &str) -> Result<HttpRequest, AuthError> {
        let mut request = HttpRequest::new(method, self.config.url(path));
        request
            .headers
            .insert(header::AUTHORIZATION, bearer_header(token)?);
        Ok(request)
    }

    async fn post_credentials<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        fallback: &str,
    ) -> Result<TokenResponse, AuthError> {
        let mut request = HttpRequest::new(Method::POST, self.config.url(path));
        request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body =
            Some(serde_json::to_value(body).map_err(|e| AuthError::MalformedResponse(e.to_string()))?);

        let response = self.send(request).await?;
        if response.status != StatusCode::OK {
            let err = AuthError::from_status(response.status, &response.body, fallback);
            warn!(status = response.status.as_u16(), error = %err, "Credentials rejected");
            return Err(err);
        }

        let token = TokenResponse::parse(&response.body)?;
        self.establish(&token)?;
        Ok(token)
    }

    fn establish(&self, token: &TokenResponse) -> Result<SessionData, AuthError> {
        let lifetime = token.expires_in.unwrap_or(self.config.token_lifetime_secs);
        self.session.save(&token.access_token, &token.user, lifetime)
    }

    fn spawn_refresh(self: &Arc<Self>, credential: String) -> RefreshFuture {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.refresh_from(&credential).await;
            let mut slot = inner.refresh_in_flight.lock().await;
            if slot.as_ref().is_some_and(|f| f.credential == credential) {
                slot.take();
            }
            result
        });
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(AuthError::Network(TransportError::Request(format!(
                    "Refresh task stopped: {}",
                    e
                )))),
            }
        }
        .boxed()
        .shared()
    }

    async fn refresh_from(&self, credential: &str) -> Result<SessionData, AuthError> {
        let result = self.request_refresh(credential).await;

        // Another flow saved or cleared the session while the request was out
        if self.session.current_credential().as_deref() != Some(credential) {
            debug!("Session changed during refresh, discarding its outcome");
            return self.session.load().ok_or(AuthError::NotAuthenticated);
        }

        match result.and_then(|token| self.establish(&token)) {
            Ok(session) => {
                info!(expires_in = ?session.expires_in, "Credential refreshed");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, clearing session");
                self.clear_quietly();
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, credential: &str) -> Result<TokenResponse, AuthError> {
        let request = self.bearer_request(Method::POST, &self.config.endpoints.refresh, credential)?;
        let response = self.send(request).await?;

        if response.status != StatusCode::OK {
            return Err(AuthError::Rejected {
                status: response.status.as_u16(),
                message: REFRESH_FAILED.to_string(),
            });
        }
        TokenResponse::parse(&response.body)
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear session");
        }
    }
}

/// Clears the session when dropped unless disarmed first.
struct ClearOnDrop<'a> {
    session: Option<&'a SessionState>,
}

impl<'a> ClearOnDrop<'a> {
    fn new(session: &'a SessionState) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session {
            if let Err(e) = session.clear() {
                warn!(error = %e, "Failed to clear session");
            }
        }
    }
}
