//! Gangway API models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the backend process is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeKind {
    Npm,
    Python,
    /// Repository-based server with an explicit argv
    Custom {
        #[serde(default)]
        command: Vec<String>,
    },
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Npm => "npm",
            RuntimeKind::Python => "python",
            RuntimeKind::Custom { .. } => "custom",
        }
    }
}

/// Declared environment variable requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Create deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
    pub package: String,
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub env_vars: Vec<EnvVarSpec>,
    /// Env var name (optionally `env_`-prefixed) to value
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// Masked credential entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskedCredential {
    pub name: String,
    pub present: bool,
}

/// Deployment response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: Uuid,
    pub name: String,
    pub package: String,
    pub runtime: RuntimeKind,
    pub env_vars: Vec<EnvVarSpec>,
    pub credentials: Vec<MaskedCredential>,
    pub state: String,
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub machine_id: Option<String>,
    pub connection_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// Create deployment response, the only place besides rotation where the token is shown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeploymentResponse {
    pub deployment: DeploymentResponse,
    pub access_token: String,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

/// Token rotation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub deployment_id: Uuid,
    pub access_token: String,
}

/// A retained deployment log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String,
    pub message: String,
}

/// Deployment logs response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogsResponse {
    pub deployment_id: Uuid,
    pub lines: Vec<LogLine>,
}

/// Package validation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatePackageRequest {
    pub package: String,
    pub runtime: RuntimeKind,
}

/// Package validation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatePackageResponse {
    pub valid: bool,
    pub runtime: String,
    pub reason: Option<String>,
    pub version: Option<String>,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub monitor: MonitorStatus,
    pub deployments: HashMap<String, usize>,
}

/// Health monitor heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub cycles: u64,
    pub last_cycle_started_at: Option<DateTime<Utc>>,
    pub last_cycle_finished_at: Option<DateTime<Utc>>,
    pub last_cycle_checked: usize,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<Uuid>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}
