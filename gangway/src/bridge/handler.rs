//! `GET|POST /mcp/{deployment_id}`

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::auth::{extract_token, token_matches};
use crate::bridge::forward::ForwardRequest;
use crate::bridge::protocol::{
    check_framing, negotiate_version, HEADER_PROTOCOL_VERSION, HEADER_SESSION_ID,
};
use crate::bridge::session::Session;
use crate::deploy::fsm::DeploymentState;
use crate::errors::GatewayError;
use crate::models::deployment::Deployment;
use crate::server::state::ServerState;

/// Bridge entry point
pub async fn mcp_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let id = Uuid::parse_str(&deployment_id)
        .map_err(|_| GatewayError::NotFound(deployment_id.clone()))?;
    let deployment = state
        .executor
        .store()
        .get(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(deployment_id.clone()))?;

    match extract_token(&headers) {
        Some(token) if token_matches(token, &deployment.access_token_hash) => {}
        Some(_) => {
            warn!("Rejected request with invalid token for deployment {}", id);
            return Err(GatewayError::Unauthorized);
        }
        None => {
            warn!("Rejected request without token for deployment {}", id);
            return Err(GatewayError::Unauthorized);
        }
    }

    let requested_version = headers
        .get(HEADER_PROTOCOL_VERSION)
        .and_then(|v| v.to_str().ok());
    let protocol_version = negotiate_version(requested_version);

    let requested_session = headers.get(HEADER_SESSION_ID).and_then(|v| v.to_str().ok());

    // sessions are only minted for requests that will reach the backend
    let (session, result) = match gate(&deployment, &method, body) {
        Ok(body) => {
            let session = state
                .sessions
                .resolve(id, requested_session, protocol_version);
            let result = relay(&state, &deployment, &session, method, body, protocol_version).await;
            (Some(session), result)
        }
        Err(e) => {
            let known = requested_session
                .and_then(|requested| state.sessions.get(requested))
                .filter(|session| session.deployment_id == id);
            (known, Err(e))
        }
    };

    let mut response = result.unwrap_or_else(|e| e.into_response());

    let headers = response.headers_mut();
    if let Some(value) = session.and_then(|s| HeaderValue::from_str(&s.id).ok()) {
        headers.insert(HEADER_SESSION_ID, value);
    }
    headers.insert(
        HEADER_PROTOCOL_VERSION,
        HeaderValue::from_static(protocol_version),
    );

    Ok(response)
}

/// Route on deployment state, then check POST framing. Returns the body to forward.
fn gate(
    deployment: &Deployment,
    method: &Method,
    body: Bytes,
) -> Result<Option<Bytes>, GatewayError> {
    let id = deployment.id;
    match deployment.state() {
        DeploymentState::Pending | DeploymentState::Installing | DeploymentState::Starting => {
            return Err(GatewayError::NotReady(id));
        }
        DeploymentState::Stopped => return Err(GatewayError::Stopped(id)),
        DeploymentState::Failed => return Err(GatewayError::DeploymentFailed(id)),
        DeploymentState::Running | DeploymentState::Unhealthy => {}
    }

    if *method == Method::POST {
        check_framing(&body)?;
        Ok(Some(body))
    } else {
        Ok(None)
    }
}

async fn relay(
    state: &ServerState,
    deployment: &Deployment,
    session: &Session,
    method: Method,
    body: Option<Bytes>,
    protocol_version: &'static str,
) -> Result<Response, GatewayError> {
    let id = deployment.id;
    let backend_url = state
        .backend
        .url_for(deployment)
        .ok_or_else(|| GatewayError::Internal(format!("deployment {} has no machine", id)))?;

    let forwarded = state
        .forwarder
        .forward(ForwardRequest {
            deployment_id: id,
            state: deployment.state(),
            backend_url,
            method,
            body,
            protocol_version,
            backend_session_id: session.backend_session_id.clone(),
        })
        .await?;

    if let Some(backend_session_id) = forwarded.backend_session_id {
        if session.backend_session_id.as_deref() != Some(backend_session_id.as_str()) {
            debug!(
                "Session {} mapped to backend session for deployment {}",
                session.id, id
            );
            state
                .sessions
                .set_backend_session(&session.id, backend_session_id);
        }
    }

    Ok(forwarded.response)
}
