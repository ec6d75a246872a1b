//! End-to-end session flows over real HTTP against a mock auth server.

use std::sync::Arc;
use std::time::Duration;

use authgate_core::{
    ApiRequest, AuthClient, AuthError, Config, FileStorage, MemoryStorage, ReqwestTransport,
    TransportError,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server_uri: &str) -> Config {
    Config {
        api_base_url: server_uri.to_string(),
        ..Config::default()
    }
}

fn client_for(server: &MockServer) -> AuthClient {
    let transport = ReqwestTransport::new().expect("build transport");
    AuthClient::new(
        config_for(&server.uri()),
        Arc::new(MemoryStorage::new()),
        Arc::new(transport),
    )
}

fn token(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 1800,
        "user": {"user_id": "u-1", "username": "alice", "email": "alice@example.com", "credit_balance": 100}
    })
}

async fn mount_login(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token(access_token)))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_refresh_and_retry_over_http() {
    let server = MockServer::start().await;
    mount_login(&server, "T1").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token("T2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/projects"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"project_id": "p-1"}])))
        .expect(1)
        .mount(&server)
        .await;

    let auth = client_for(&server);
    let login = auth.login("alice", "pw").await.unwrap();
    assert_eq!(login.user["username"], "alice");
    assert!(auth.has_session());

    let projects: Value = auth
        .gateway()
        .send_json(ApiRequest::get("/api/v1/projects"))
        .await
        .unwrap();
    assert_eq!(projects[0]["project_id"], "p-1");
    assert_eq!(auth.session().current_credential().as_deref(), Some("T2"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    let login_body: Value = requests[0].body_json().unwrap();
    assert_eq!(login_body, json!({"username": "alice", "password": "pw"}));
}

#[tokio::test]
async fn concurrent_rejections_trigger_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token("T2"))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let auth = client_for(&server);
    auth.session().save("T1", &json!({"id": 1}), 1800).unwrap();

    let gateway = auth.gateway();
    let (a, b) = tokio::join!(
        gateway.send(ApiRequest::get("/api/v1/storyboard")),
        gateway.send(ApiRequest::get("/api/v1/projects")),
    );
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
}

#[tokio::test]
async fn timed_out_refresh_leaves_later_login_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Token expired"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .and(header("authorization", "Bearer T5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token("T6")))
        .expect(1)
        .mount(&server)
        .await;

    let auth = client_for(&server);
    auth.session().save("T1", &json!({"id": 1}), 1800).unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), auth.refresh_credential()).await;
    assert!(abandoned.is_err());

    auth.session().save("T5", &json!({"id": 1}), 1800).unwrap();
    let fresh = auth.refresh_credential().await.unwrap();
    assert_eq!(fresh.token, "T6");

    // Let the T1 rejection arrive
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(auth.has_session());
    assert_eq!(auth.session().current_credential().as_deref(), Some("T6"));
}

#[tokio::test]
async fn failed_refresh_expires_session_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/projects/7"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = client_for(&server);
    auth.session().save("T1", &json!({"id": 1}), 1800).unwrap();

    let err = auth
        .gateway()
        .send(ApiRequest::put("/api/v1/projects/7").json(json!({"title": "draft"})))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::SessionExpired);
    assert!(!auth.has_session());
}

#[tokio::test]
async fn transport_timeout_is_reported_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token("T1"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let transport = ReqwestTransport::with_timeout(Duration::from_millis(100)).unwrap();
    let auth = AuthClient::new(
        config_for(&server.uri()),
        Arc::new(MemoryStorage::new()),
        Arc::new(transport),
    );

    let err = auth.login("alice", "pw").await.unwrap_err();
    assert!(matches!(err, AuthError::Network(TransportError::Timeout(_))));
    assert_eq!(err.to_string(), "Network error, please try again later");
    assert!(!auth.has_session());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let auth = AuthClient::new(
        config_for("http://127.0.0.1:1"),
        Arc::new(MemoryStorage::new()),
        Arc::new(ReqwestTransport::new().unwrap()),
    );

    let err = auth.login("alice", "pw").await.unwrap_err();
    assert!(err.is_network());
}

#[tokio::test]
async fn file_backed_session_survives_restart_and_logout_clears_it() {
    let server = MockServer::start().await;
    mount_login(&server, "T1").await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/logout"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let open = || {
        AuthClient::new(
            config_for(&server.uri()),
            Arc::new(FileStorage::in_dir(dir.path())),
            Arc::new(ReqwestTransport::new().unwrap()),
        )
    };

    open().login("alice", "pw").await.unwrap();

    let restarted = open();
    assert!(restarted.has_session());
    assert_eq!(restarted.session().identity().unwrap()["username"], "alice");

    // Server-side logout failure must not keep the local session alive
    restarted.logout().await.unwrap();
    assert!(!restarted.has_session());
    assert!(!open().has_session());
}

#[tokio::test]
async fn current_user_rejection_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid token"})))
        .expect(1)
        .mount(&server)
        .await;

    let auth = client_for(&server);
    auth.session().save("T1", &json!({"id": 1}), 1800).unwrap();

    let err = auth.get_current_user().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(!auth.has_session());
}

#[tokio::test]
async fn health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "message": "auth service running",
            "database_connected": true,
            "timestamp": "2026-10-16 09:00:00"
        })))
        .mount(&server)
        .await;

    let health = client_for(&server).health().await.unwrap();
    assert!(health.is_ok());
    assert_eq!(health.database_connected, Some(true));
}
