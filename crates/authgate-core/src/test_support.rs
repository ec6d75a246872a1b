//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::auth::AuthClient;
use crate::config::Config;
use crate::storage::MemoryStorage;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Replays queued responses in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, status: u16, body: Value) {
        let status = StatusCode::from_u16(status).unwrap();
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, body.to_string())));
    }

    pub fn reply_raw(&self, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap();
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn fail(&self, err: TransportError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn authorization(&self, index: usize) -> Option<String> {
        self.requests()
            .get(index)?
            .headers
            .get(reqwest::header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        // Suspend like a real network call so concurrent callers interleave
        tokio::task::yield_now().await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {} {}", request.method, request.url))
    }
}

pub fn client(transport: &Arc<ScriptedTransport>) -> (AuthClient, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let client = AuthClient::new(Config::default(), storage.clone(), transport.clone());
    (client, storage)
}

pub fn token_body(token: &str) -> Value {
    serde_json::json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 1800,
        "user": {"id": 1, "username": "alice"}
    })
}

/// Never answers, like a server that accepted the connection and went quiet.
pub struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        futures::future::pending().await
    }
}
