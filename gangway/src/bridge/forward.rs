//! Forwarding to backend MCP servers

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::protocol::{HEADER_PROTOCOL_VERSION, HEADER_SESSION_ID};
use crate::deploy::fsm::DeploymentState;
use crate::errors::GatewayError;

const ACCEPT_MCP: &str = "application/json, text/event-stream";

/// Hop-by-hop and framing headers never copied from the backend
const SKIPPED_RESPONSE_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Forwarder options
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum wait for backend response headers
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One request to relay
pub struct ForwardRequest {
    pub deployment_id: Uuid,
    /// State the deployment was in when routed; picks the failure category
    pub state: DeploymentState,
    pub backend_url: String,
    pub method: Method,
    pub body: Option<Bytes>,
    pub protocol_version: &'static str,
    pub backend_session_id: Option<String>,
}

/// Relayed backend response, with the backend's session id split out
pub struct ForwardResponse {
    pub response: Response,
    pub backend_session_id: Option<String>,
}

pub struct Forwarder {
    client: Client,
    response_timeout: Duration,
}

impl Forwarder {
    pub fn new(options: Options) -> Result<Self, GatewayError> {
        // no overall timeout: SSE bodies stay open as long as the client does
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            response_timeout: options.response_timeout,
        })
    }

    pub async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse, GatewayError> {
        let url = format!("{}/mcp", request.backend_url.trim_end_matches('/'));
        debug!("{} {} (deployment {})", request.method, url, request.deployment_id);

        let mut outbound = self
            .client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, ACCEPT_MCP)
            .header(HEADER_PROTOCOL_VERSION, request.protocol_version);

        if let Some(backend_session_id) = &request.backend_session_id {
            outbound = outbound.header(HEADER_SESSION_ID, backend_session_id);
        }
        if request.method == Method::POST {
            outbound = outbound
                .header(header::CONTENT_TYPE, "application/json")
                .body(request.body.unwrap_or_default());
        }

        let upstream = match tokio::time::timeout(self.response_timeout, outbound.send()).await {
            Err(_) => {
                warn!(
                    "Backend for deployment {} did not respond within {:?}",
                    request.deployment_id, self.response_timeout
                );
                return Err(GatewayError::BackendTimeout(request.deployment_id));
            }
            // connect timeouts report is_timeout() too; they are an unreachable backend
            Ok(Err(e)) if e.is_timeout() && !e.is_connect() => {
                warn!("Backend for deployment {} timed out: {}", request.deployment_id, e);
                return Err(GatewayError::BackendTimeout(request.deployment_id));
            }
            Ok(Err(e)) => {
                warn!("Backend for deployment {} unreachable: {}", request.deployment_id, e);
                return Err(match request.state {
                    DeploymentState::Unhealthy => GatewayError::BackendUnhealthy(request.deployment_id),
                    _ => GatewayError::BackendUnreachable(request.deployment_id),
                });
            }
            Ok(Ok(response)) => response,
        };

        Ok(relay(upstream))
    }
}

fn relay(upstream: reqwest::Response) -> ForwardResponse {
    let status = upstream.status();

    let mut headers = HeaderMap::new();
    let mut backend_session_id = None;
    for (name, value) in upstream.headers() {
        let name_str = name.as_str();
        if name_str.eq_ignore_ascii_case(HEADER_SESSION_ID) {
            backend_session_id = value.to_str().ok().map(str::to_string);
            continue;
        }
        if SKIPPED_RESPONSE_HEADERS.contains(&name_str) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;

    ForwardResponse {
        response,
        backend_session_id,
    }
}
