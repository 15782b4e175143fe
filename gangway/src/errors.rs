//! Error types for the gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use gangway_api::models::{ErrorDetail, ErrorResponse};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    #[error("Package rejected for deployment {deployment_id}: {reason}")]
    PackageRejected { deployment_id: Uuid, reason: String },

    #[error("Provisioner error: {0}")]
    ProvisionerError(String),

    #[error("Provisioning failed for deployment {deployment_id}: {message}")]
    ProvisioningFailed { deployment_id: Uuid, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deployment {0} is not ready")]
    NotReady(Uuid),

    #[error("Deployment {0} is stopped")]
    Stopped(Uuid),

    #[error("Deployment {0} has failed")]
    DeploymentFailed(Uuid),

    #[error("Backend for deployment {0} refused the connection")]
    BackendUnreachable(Uuid),

    #[error("Backend for deployment {0} is unhealthy")]
    BackendUnhealthy(Uuid),

    #[error("Backend for deployment {0} timed out")]
    BackendTimeout(Uuid),

    #[error("Malformed request: {0}")]
    MalformedPayload(String),

    #[error("JSON-RPC parse error: {0}")]
    ParseError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl GatewayError {
    /// Machine-parseable category exposed to clients
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::ValidationError(_) => "validation_error",
            GatewayError::MissingCredentials(_) => "missing_credentials",
            GatewayError::PackageRejected { .. } => "package_rejected",
            GatewayError::ProvisionerError(_) | GatewayError::ProvisioningFailed { .. } => {
                "provisioning_failed"
            }
            GatewayError::NotFound(_) => "deployment_not_found",
            GatewayError::InvalidTransition(_) => "invalid_transition",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::NotReady(_) => "deployment_not_ready",
            GatewayError::Stopped(_) => "deployment_stopped",
            GatewayError::DeploymentFailed(_) => "deployment_failed",
            GatewayError::BackendUnreachable(_) => "backend_unreachable",
            GatewayError::BackendUnhealthy(_) => "deployment_unhealthy",
            GatewayError::BackendTimeout(_) => "backend_timeout",
            GatewayError::MalformedPayload(_) => "invalid_request",
            GatewayError::ParseError(_) => "parse_error",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::IoError(_)
            | GatewayError::JsonError(_)
            | GatewayError::HttpError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::ServerError(_)
            | GatewayError::ShutdownError(_)
            | GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ValidationError(_)
            | GatewayError::MissingCredentials(_)
            | GatewayError::PackageRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::ProvisionerError(_) | GatewayError::ProvisioningFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidTransition(_) | GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::NotReady(_)
            | GatewayError::Stopped(_)
            | GatewayError::DeploymentFailed(_)
            | GatewayError::BackendUnreachable(_)
            | GatewayError::BackendUnhealthy(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::MalformedPayload(_) | GatewayError::ParseError(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Infrastructure errors are replaced with
    /// a generic line so upstream bodies and paths never leak.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::NotReady(_) => {
                "Deployment is still being provisioned; retry shortly".to_string()
            }
            GatewayError::Stopped(_) => {
                "Deployment is stopped; restart it to accept requests".to_string()
            }
            GatewayError::DeploymentFailed(_) => {
                "Deployment failed; inspect its error message and logs".to_string()
            }
            GatewayError::BackendUnreachable(_) => {
                "Backend connection refused; the server process may have crashed".to_string()
            }
            GatewayError::BackendUnhealthy(_) => {
                "Deployment is unhealthy and its backend did not respond".to_string()
            }
            GatewayError::BackendTimeout(_) => "Backend did not respond in time".to_string(),
            GatewayError::ProvisionerError(_) | GatewayError::ProvisioningFailed { .. } => {
                "Compute provisioner rejected the request".to_string()
            }
            GatewayError::Unauthorized => "Missing or invalid access token".to_string(),
            GatewayError::IoError(_)
            | GatewayError::JsonError(_)
            | GatewayError::HttpError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::ServerError(_)
            | GatewayError::ShutdownError(_)
            | GatewayError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    fn deployment_id(&self) -> Option<Uuid> {
        match self {
            GatewayError::PackageRejected { deployment_id, .. }
            | GatewayError::ProvisioningFailed { deployment_id, .. } => Some(*deployment_id),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                category: self.category().to_string(),
                message: self.public_message(),
                deployment_id: self.deployment_id(),
            },
        };
        (status, Json(body)).into_response()
    }
}
