//! Authenticated requests.
//!
//! The gateway attaches the stored credential to an arbitrary request, and on
//! a 401 refreshes once and resends once. The retry's response is final
//! whatever its status, so a credential the server keeps rejecting can never
//! cause a refresh loop.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::AuthError;
use crate::auth::{bearer_header, AuthClient};
use crate::transport::{HttpRequest, HttpResponse};

/// A request as the caller describes it, before credentials are attached.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute URL, or a path resolved against the configured base URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Clone)]
pub struct Gateway {
    auth: AuthClient,
}

impl Gateway {
    pub fn new(auth: AuthClient) -> Self {
        Self { auth }
    }

    /// Send `request` with the current credential attached.
    ///
    /// Fails with `NotAuthenticated` before any network call when there is no
    /// session, and with `SessionExpired` when a 401 could not be recovered by
    /// a refresh. Every other response, error statuses included, is returned
    /// as is.
    pub async fn send(&self, request: ApiRequest) -> Result<HttpResponse, AuthError> {
        let token = self
            .auth
            .session()
            .current_credential()
            .ok_or(AuthError::NotAuthenticated)?;

        let outbound = self.build(&request, &token)?;
        let response = self.auth.send(outbound.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!(method = %request.method, url = %outbound.url, "Credential rejected, refreshing");
        let refreshed = match self.auth.refresh_after_rejection(&token).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Refresh failed, session expired");
                return Err(AuthError::SessionExpired);
            }
        };

        let mut retry = outbound;
        retry
            .headers
            .insert(header::AUTHORIZATION, bearer_header(&refreshed.token)?);
        debug!(url = %retry.url, "Retrying with refreshed credential");
        self.auth.send(retry).await
    }

    /// Send and decode a successful JSON body. Non-success statuses become
    /// `Rejected` with the server's detail message.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AuthError> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(AuthError::from_status(response.status, &response.body, "Request failed"));
        }
        response.json()
    }

    /// Merge headers: defaults, then the caller's, then the credential, which
    /// the caller cannot override.
    fn build(&self, request: &ApiRequest, token: &str) -> Result<HttpRequest, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for name in request.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in request.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        headers.insert(header::AUTHORIZATION, bearer_header(token)?);

        Ok(HttpRequest {
            method: request.method.clone(),
            url: self.auth.config().url(&request.url),
            headers,
            body: request.body.clone(),
        })
    }
}
