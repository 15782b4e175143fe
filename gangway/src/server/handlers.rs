//! HTTP request handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use gangway_api::models::{
    AccessTokenResponse, CreateDeploymentRequest, CreateDeploymentResponse,
    DeploymentListResponse, DeploymentLogsResponse, DeploymentResponse, HealthResponse,
    RuntimeKind, ValidatePackageRequest, ValidatePackageResponse, VersionResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::auth::admin_key_matches;
use crate::cache::validation::CacheKey;
use crate::deploy::fsm::DeploymentState;
use crate::errors::GatewayError;
use crate::models::deployment::Deployment;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let mut deployments: HashMap<String, usize> = DeploymentState::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();

    let status = match state.executor.store().list().await {
        Ok(records) => {
            for record in records {
                *deployments.entry(record.state().to_string()).or_default() += 1;
            }
            "healthy"
        }
        Err(e) => {
            warn!("Health check could not list deployments: {}", e);
            "degraded"
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        service: "gangway".to_string(),
        version: version_info().version,
        monitor: state.heartbeat.status(),
        deployments,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Reject management calls without the admin key, when one is configured
pub async fn require_admin_key(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.admin_api_key {
        if !admin_key_matches(request.headers(), expected) {
            warn!("Rejected management request to {}", request.uri().path());
            return GatewayError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

fn parse_id(id: &str) -> Result<Uuid, GatewayError> {
    Uuid::parse_str(id).map_err(|_| GatewayError::NotFound(id.to_string()))
}

async fn to_response(
    state: &ServerState,
    deployment: &Deployment,
) -> Result<DeploymentResponse, GatewayError> {
    let credentials = state.executor.credentials(deployment.id).await?;
    Ok(deployment.to_response(&state.public_url, &credentials))
}

/// Create a deployment
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let (deployment, token) = state.executor.create(request).await?;
    let response = CreateDeploymentResponse {
        deployment: to_response(&state, &deployment).await?,
        access_token: token.expose().to_string(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List deployments
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, GatewayError> {
    let records = state.executor.store().list().await?;
    let mut deployments = Vec::with_capacity(records.len());
    for record in &records {
        deployments.push(to_response(&state, record).await?);
    }
    let total = deployments.len();
    Ok(Json(DeploymentListResponse { deployments, total }))
}

/// Get one deployment
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deployment = state.executor.get(parse_id(&id)?).await?;
    Ok(Json(to_response(&state, &deployment).await?))
}

/// Delete a deployment
pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    state.executor.delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Restart a stopped or failed deployment
pub async fn restart_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deployment = state.executor.restart(parse_id(&id)?).await?;
    Ok(Json(to_response(&state, &deployment).await?))
}

/// Stop a running deployment
pub async fn stop_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deployment = state.executor.stop(parse_id(&id)?).await?;
    Ok(Json(to_response(&state, &deployment).await?))
}

/// Rotate the access token
pub async fn rotate_token_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deployment_id = parse_id(&id)?;
    let token = state.executor.rotate_token(deployment_id).await?;
    Ok(Json(AccessTokenResponse {
        deployment_id,
        access_token: token.expose().to_string(),
    }))
}

/// Deployment logs
pub async fn deployment_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let deployment_id = parse_id(&id)?;
    let lines = state.executor.logs_for(deployment_id).await?;
    Ok(Json(DeploymentLogsResponse {
        deployment_id,
        lines,
    }))
}

/// Validate a package without deploying it
pub async fn validate_package_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ValidatePackageRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let result = state
        .validator
        .validate(&request.package, &request.runtime)
        .await?;

    Ok(Json(ValidatePackageResponse {
        valid: result.valid,
        runtime: result.runtime.as_str().to_string(),
        reason: result.reason.map(|r| r.as_str().to_string()),
        version: result.version,
    }))
}

/// Clear the whole validation cache
pub async fn clear_validation_cache_handler(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    state.validator.cache().clear();
    info!("Validation cache cleared");
    StatusCode::NO_CONTENT
}

/// Drop one validation cache entry
pub async fn invalidate_validation_cache_handler(
    State(state): State<Arc<ServerState>>,
    Path((runtime, identifier)): Path<(String, String)>,
) -> Result<impl IntoResponse, GatewayError> {
    let runtime = match runtime.as_str() {
        "npm" => RuntimeKind::Npm,
        "python" => RuntimeKind::Python,
        "custom" => RuntimeKind::Custom { command: vec![] },
        other => {
            return Err(GatewayError::ValidationError(format!(
                "unknown runtime '{}'",
                other
            )))
        }
    };

    let key = CacheKey::new(runtime.as_str(), identifier.trim());
    if state.validator.cache().invalidate(&key) {
        info!("Validation cache entry {}:{} dropped", key.runtime, key.identifier);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!(
            "{}:{}",
            key.runtime, key.identifier
        )))
    }
}
