//! Machines API models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Create machine request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMachineRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub config: MachineConfig,
}

/// Machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub image: String,
    pub guest: GuestConfig,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub init: InitConfig,
    pub restart: RestartConfig,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Guest sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestConfig {
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            cpu_kind: "shared".to_string(),
            cpus: 1,
            memory_mb: 256,
        }
    }
}

/// Process launch configuration. `cmd` is an argv array, never a shell string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    #[serde(default)]
    pub cmd: Vec<String>,
}

/// Restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    pub policy: String,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: "always".to_string(),
        }
    }
}

/// Machine state as reported by the provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspended,
    Replacing,
    Destroying,
    Destroyed,
    #[serde(other)]
    Unknown,
}

impl MachineState {
    /// Deliberately stopped, as opposed to crashed
    pub fn is_stopped(&self) -> bool {
        matches!(self, MachineState::Stopped | MachineState::Suspended)
    }

    /// The machine no longer exists or is being torn down
    pub fn is_gone(&self) -> bool {
        matches!(self, MachineState::Destroying | MachineState::Destroyed)
    }
}

/// Machine details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub state: MachineState,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Output stream a log line was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A single machine log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Machine logs response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub lines: Vec<LogEntry>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub status: Option<String>,
}
