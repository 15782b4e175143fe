//! Shared fakes for the unit tests

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use machines_api::models::{LogEntry, LogStream, Machine, MachineState};
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use gangway::app::options::AppOptions;
use gangway::app::state::AppState;
use gangway::compute::{BackendAddress, ComputeProvisioner, MachineSpec};
use gangway::deploy::fsm::{DeploymentState, FsmSettings};
use gangway::errors::GatewayError;
use gangway::server::serve::router;
use gangway::store::{DeploymentStore, MemoryStore};
use gangway::validator;

/// Serve a router on an ephemeral local port
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

// ================================ PROVISIONER =================================== //

/// In-memory provisioner that counts every call
#[derive(Default)]
pub struct FakeProvisioner {
    machines: Mutex<HashMap<String, MachineState>>,
    pub specs: Mutex<Vec<MachineSpec>>,
    pub creates: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_create: AtomicBool,
    /// Held before answering `create_machine`
    pub create_delay: Mutex<Option<Duration>>,
    /// Machine ids whose lookups error
    pub broken: Mutex<HashSet<String>>,
    /// Machine ids whose lookups panic
    pub panicking: Mutex<HashSet<String>>,
}

impl FakeProvisioner {
    pub fn calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.starts.load(Ordering::SeqCst)
            + self.stops.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, id: &str, state: MachineState) {
        self.machines.lock().unwrap().insert(id.to_string(), state);
    }

    pub fn forget(&self, id: &str) {
        self.machines.lock().unwrap().remove(id);
    }

    pub fn machine_count(&self) -> usize {
        self.machines.lock().unwrap().len()
    }
}

#[async_trait]
impl ComputeProvisioner for FakeProvisioner {
    async fn create_machine(&self, spec: MachineSpec) -> Result<String, GatewayError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::ProvisionerError("500: capacity".to_string()));
        }
        let id = format!("m-{}", n);
        self.specs.lock().unwrap().push(spec);
        self.set_state(&id, MachineState::Started);
        Ok(id)
    }

    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, GatewayError> {
        if self.panicking.lock().unwrap().contains(id) {
            panic!("machine lookup for {} blew up", id);
        }
        if self.broken.lock().unwrap().contains(id) {
            return Err(GatewayError::ProvisionerError("502: bad gateway".to_string()));
        }
        Ok(self.machines.lock().unwrap().get(id).map(|state| Machine {
            id: id.to_string(),
            state: state.clone(),
            name: None,
            region: None,
            private_ip: None,
            created_at: None,
            updated_at: None,
        }))
    }

    async fn start_machine(&self, id: &str) -> Result<(), GatewayError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_state(id, MachineState::Started);
        Ok(())
    }

    async fn stop_machine(&self, id: &str) -> Result<(), GatewayError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(id, MachineState::Stopped);
        Ok(())
    }

    async fn delete_machine(&self, id: &str) -> Result<(), GatewayError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.forget(id);
        Ok(())
    }

    async fn fetch_logs(&self, _id: &str) -> Result<Vec<LogEntry>, GatewayError> {
        Ok(vec![LogEntry {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            message: "server listening".to_string(),
        }])
    }
}

// ================================= REGISTRY ===================================== //

/// npm, PyPI and GitHub stand-ins. Known names: `weather-server` on npm,
/// `mcp-server-time` on PyPI, `acme/tools` on GitHub.
#[derive(Default)]
pub struct FakeRegistry {
    pub hits: AtomicUsize,
    pub down: AtomicBool,
}

async fn npm_package(
    State(registry): State<Arc<FakeRegistry>>,
    Path(name): Path<String>,
) -> Response {
    registry.hits.fetch_add(1, Ordering::SeqCst);
    if registry.down.load(Ordering::SeqCst) {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    match name.as_str() {
        "weather-server" | "@acme/weather" => {
            Json(json!({"name": name, "dist-tags": {"latest": "1.4.2"}})).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn pypi_project(
    State(registry): State<Arc<FakeRegistry>>,
    Path(name): Path<String>,
) -> Response {
    registry.hits.fetch_add(1, Ordering::SeqCst);
    match name.as_str() {
        "mcp-server-time" => Json(json!({"info": {"version": "0.6.2"}})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn github_repo(
    State(registry): State<Arc<FakeRegistry>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    registry.hits.fetch_add(1, Ordering::SeqCst);
    match (owner.as_str(), repo.as_str()) {
        ("acme", "tools") => Json(json!({"full_name": "acme/tools"})).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn spawn_registry() -> (Arc<FakeRegistry>, validator::Options) {
    let registry = Arc::new(FakeRegistry::default());
    let app = Router::new()
        .route("/npm/{name}", get(npm_package))
        .route("/pypi/{name}/json", get(pypi_project))
        .route("/github/repos/{owner}/{repo}", get(github_repo))
        .with_state(registry.clone());
    let addr = spawn_server(app).await;

    let options = validator::Options {
        npm_url: format!("http://{}/npm", addr),
        pypi_url: format!("http://{}/pypi", addr),
        github_url: format!("http://{}/github", addr),
        timeout: Duration::from_secs(2),
    };
    (registry, options)
}

// ================================== BACKEND ===================================== //

/// MCP server stand-in
pub struct FakeBackend {
    pub healthy: AtomicBool,
    pub requests: AtomicUsize,
    pub last_headers: Mutex<Option<HeaderMap>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
            last_headers: Mutex::new(None),
        }
    }
}

impl FakeBackend {
    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|headers| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

async fn backend_status(State(backend): State<Arc<FakeBackend>>) -> StatusCode {
    if backend.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn backend_post(
    State(backend): State<Arc<FakeBackend>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    *backend.last_headers.lock().unwrap() = Some(headers);

    let request: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    let reply = json!({
        "jsonrpc": "2.0",
        "id": request.get("id").cloned().unwrap_or(serde_json::Value::Null),
        "result": {"tools": [{"name": "forecast"}]}
    });
    (
        [("mcp-session-id", "backend-session-1")],
        Json(reply),
    )
        .into_response()
}

async fn backend_stream(
    State(backend): State<Arc<FakeBackend>>,
    headers: HeaderMap,
) -> Response {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    *backend.last_headers.lock().unwrap() = Some(headers);
    (
        [("content-type", "text/event-stream")],
        "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n",
    )
        .into_response()
}

pub async fn spawn_backend() -> (Arc<FakeBackend>, String) {
    let backend = Arc::new(FakeBackend::default());
    let app = Router::new()
        .route("/status", get(backend_status))
        .route("/mcp", get(backend_stream).post(backend_post))
        .with_state(backend.clone());
    let addr = spawn_server(app).await;
    (backend, format!("http://{}", addr))
}

// ================================== GATEWAY ===================================== //

pub struct TestGateway {
    pub options: AppOptions,
    pub state: AppState,
    pub provisioner: Arc<FakeProvisioner>,
    pub registry: Arc<FakeRegistry>,
    pub backend: Arc<FakeBackend>,
}

impl TestGateway {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn DeploymentStore>) -> Self {
        let (registry, validator_options) = spawn_registry().await;
        let (backend, backend_url) = spawn_backend().await;
        let provisioner = Arc::new(FakeProvisioner::default());

        let options = AppOptions {
            public_url: "https://gw.example.com".to_string(),
            validator: validator_options,
            backend: BackendAddress {
                url_template: Some(backend_url),
                ..Default::default()
            },
            probe_timeout: Duration::from_secs(1),
            fsm_settings: FsmSettings {
                startup_timeout: Duration::from_secs(1),
                startup_poll_interval: Duration::from_millis(20),
                failure_threshold: 1,
            },
            ..Default::default()
        };

        let state = AppState::with_components(&options, store, provisioner.clone()).unwrap();

        Self {
            options,
            state,
            provisioner,
            registry,
            backend,
        }
    }

    pub fn router(&self) -> Router {
        router(Arc::new(self.state.server_state(&self.options)))
    }

    pub async fn wait_for_state(&self, id: Uuid, expected: DeploymentState) {
        for _ in 0..250 {
            let deployment = self.state.store.get(id).await.unwrap();
            if deployment.map(|d| d.state()) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("deployment {} never reached {}", id, expected);
    }
}
