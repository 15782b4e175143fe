//! Protocol bridge tests

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use std::time::Duration;

use axum::routing::post as post_route;
use gangway::bridge::forward::{self, Forwarder};
use gangway::bridge::protocol::LATEST_PROTOCOL_VERSION;
use gangway::compute::BackendAddress;
use gangway::deploy::fsm::{DeploymentEvent, DeploymentState};
use gangway::models::deployment::{AccessToken, CredentialSet, Deployment};
use gangway::server::serve::router;
use gangway_api::models::{CreateDeploymentRequest, RuntimeKind};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::support::{spawn_server, TestGateway};

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;

async fn create_running(gateway: &TestGateway) -> (Uuid, String) {
    let (deployment, token) = gateway
        .state
        .executor
        .create(CreateDeploymentRequest {
            name: "weather".to_string(),
            package: "weather-server".to_string(),
            runtime: RuntimeKind::Npm,
            env_vars: vec![],
            credentials: HashMap::new(),
        })
        .await
        .unwrap();
    gateway
        .wait_for_state(deployment.id, DeploymentState::Running)
        .await;
    (deployment.id, token.expose().to_string())
}

/// Record driven straight to the given events, with its plaintext token
async fn seed(gateway: &TestGateway, events: &[DeploymentEvent]) -> (Uuid, String) {
    let token = AccessToken::generate();
    let record = Deployment::new(
        "seeded".to_string(),
        "weather-server".to_string(),
        RuntimeKind::Npm,
        vec![],
        token.hash(),
    );
    let record = gateway
        .state
        .store
        .insert(record, CredentialSet::new())
        .await
        .unwrap();
    for event in events {
        gateway.state.store.transition(record.id, event).await.unwrap();
    }
    (record.id, token.expose().to_string())
}

fn post(id: impl std::fmt::Display, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/mcp/{}", id))
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn error_category(response: Response) -> String {
    json_body(response).await["error"]["category"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_missing_token_is_rejected_before_forwarding() {
    let gateway = TestGateway::new().await;
    let (id, _token) = create_running(&gateway).await;
    let app = gateway.router();

    let response = send(&app, post(id, None, INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_category(response).await, "unauthorized");

    let response = send(&app, post(id, Some("not-the-token"), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(gateway.backend.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_deployment() {
    let gateway = TestGateway::new().await;
    let app = gateway.router();

    let response = send(&app, post(Uuid::new_v4(), Some("t"), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_category(response).await, "deployment_not_found");

    let response = send(&app, post("not-a-uuid", Some("t"), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_is_forwarded() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let mut request = post(id, Some(&token), INITIALIZE);
    request
        .headers_mut()
        .insert("mcp-protocol-version", "2025-03-26".parse().unwrap());
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("mcp-protocol-version").unwrap(),
        "2025-03-26"
    );
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_ne!(session_id, "backend-session-1");

    let body = json_body(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["tools"][0]["name"], "forecast");
    assert_eq!(
        gateway.backend.last_header("mcp-protocol-version").as_deref(),
        Some("2025-03-26")
    );
    assert!(gateway.backend.last_header("authorization").is_none());

    // the same bridge session maps onto the backend's session
    let mut request = post(id, Some(&token), r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
    request
        .headers_mut()
        .insert("mcp-session-id", session_id.parse().unwrap());
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("mcp-session-id").unwrap(), session_id.as_str());
    assert_eq!(
        gateway.backend.last_header("mcp-session-id").as_deref(),
        Some("backend-session-1")
    );
}

#[tokio::test]
async fn test_unsupported_version_falls_back_to_latest() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let mut request = post(id, Some(&token), INITIALIZE);
    request
        .headers_mut()
        .insert("mcp-protocol-version", "1999-01-01".parse().unwrap());
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("mcp-protocol-version").unwrap(),
        LATEST_PROTOCOL_VERSION
    );
}

#[tokio::test]
async fn test_access_token_header_is_accepted() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/mcp/{}", id))
        .header("x-access-token", token)
        .body(Body::from(INITIALIZE))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_payloads_are_not_forwarded() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let response = send(&app, post(id, Some(&token), "{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_category(response).await, "parse_error");

    let response = send(&app, post(id, Some(&token), r#"{"id":1,"method":"ping"}"#)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_category(response).await, "invalid_request");

    let response = send(&app, post(id, Some(&token), "[]")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(gateway.backend.requests.load(Ordering::SeqCst), 0);
    assert!(gateway.state.sessions.is_empty());
}

#[tokio::test]
async fn test_get_streams_events() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/mcp/{}", id))
        .header("authorization", format!("Bearer {}", token))
        .header("accept", "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("notifications/progress"));
}

#[tokio::test]
async fn test_state_routing() {
    let gateway = TestGateway::new().await;
    let app = gateway.router();

    let created = DeploymentEvent::MachineCreated("m-9".to_string());
    let cases = [
        (vec![], "deployment_not_ready"),
        (vec![DeploymentEvent::Accept], "deployment_not_ready"),
        (vec![DeploymentEvent::Accept, created.clone()], "deployment_not_ready"),
        (
            vec![
                DeploymentEvent::Accept,
                created.clone(),
                DeploymentEvent::ProbeSucceeded,
                DeploymentEvent::MachineStopped,
            ],
            "deployment_stopped",
        ),
        (
            vec![DeploymentEvent::Fail("boom".to_string())],
            "deployment_failed",
        ),
    ];

    for (events, category) in cases {
        let (id, token) = seed(&gateway, &events).await;
        let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", category);
        assert_eq!(error_category(response).await, category);
    }

    assert_eq!(gateway.backend.requests.load(Ordering::SeqCst), 0);
    assert!(gateway.state.sessions.is_empty());
}

#[tokio::test]
async fn test_refused_request_keeps_known_session() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    let app = gateway.router();

    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    gateway.state.executor.stop(id).await.unwrap();

    let mut request = post(id, Some(&token), INITIALIZE);
    request
        .headers_mut()
        .insert("mcp-session-id", session_id.parse().unwrap());
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("mcp-session-id").unwrap(), session_id.as_str());

    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    assert!(response.headers().get("mcp-session-id").is_none());
    assert_eq!(gateway.state.sessions.len(), 1);
}

#[tokio::test]
async fn test_unreachable_backend_categories() {
    let gateway = TestGateway::new().await;
    let mut server_state = gateway.state.server_state(&gateway.options);
    server_state.backend = BackendAddress {
        url_template: Some("http://127.0.0.1:1".to_string()),
        ..Default::default()
    };
    let app = router(Arc::new(server_state));

    let running = [
        DeploymentEvent::Accept,
        DeploymentEvent::MachineCreated("m-9".to_string()),
        DeploymentEvent::ProbeSucceeded,
    ];
    let (id, token) = seed(&gateway, &running).await;
    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_category(response).await, "backend_unreachable");

    gateway
        .state
        .store
        .transition(id, &DeploymentEvent::ProbeFailed { threshold: 1 })
        .await
        .unwrap();
    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_category(response).await, "deployment_unhealthy");
}

#[tokio::test]
async fn test_unhealthy_deployment_still_forwards() {
    let gateway = TestGateway::new().await;
    let (id, token) = create_running(&gateway).await;
    gateway
        .state
        .store
        .transition(id, &DeploymentEvent::ProbeFailed { threshold: 1 })
        .await
        .unwrap();

    let response = send(&gateway.router(), post(id, Some(&token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rotated_token_replaces_the_old_one() {
    let gateway = TestGateway::new().await;
    let (id, old_token) = create_running(&gateway).await;
    let app = gateway.router();

    let new_token = gateway.state.executor.rotate_token(id).await.unwrap();

    let response = send(&app, post(id, Some(&old_token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, post(id, Some(new_token.expose()), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

fn running_events() -> Vec<DeploymentEvent> {
    vec![
        DeploymentEvent::Accept,
        DeploymentEvent::MachineCreated("m-9".to_string()),
        DeploymentEvent::ProbeSucceeded,
    ]
}

/// Router whose backend address and forwarder timeouts are overridden
fn router_with(gateway: &TestGateway, backend_url: &str, options: forward::Options) -> Router {
    let mut server_state = gateway.state.server_state(&gateway.options);
    server_state.backend = BackendAddress {
        url_template: Some(backend_url.to_string()),
        ..Default::default()
    };
    server_state.forwarder = Arc::new(Forwarder::new(options).unwrap());
    router(Arc::new(server_state))
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let gateway = TestGateway::new().await;
    let slow = Router::new().route(
        "/mcp",
        post_route(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "{}"
        }),
    );
    let addr = spawn_server(slow).await;
    let app = router_with(
        &gateway,
        &format!("http://{}", addr),
        forward::Options {
            response_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    );

    let (id, token) = seed(&gateway, &running_events()).await;
    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_category(response).await, "backend_timeout");
}

#[tokio::test]
async fn test_connect_failure_is_unreachable_not_timeout() {
    let gateway = TestGateway::new().await;
    // non-routable: either the connect times out or the network refuses it
    let app = router_with(
        &gateway,
        "http://10.255.255.1:9",
        forward::Options {
            connect_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_secs(10),
        },
    );

    let (id, token) = seed(&gateway, &running_events()).await;
    let response = send(&app, post(id, Some(&token), INITIALIZE)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_category(response).await, "backend_unreachable");
}
