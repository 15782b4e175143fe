//! Compute provisioner seam

pub mod machines;

use std::collections::HashMap;

use async_trait::async_trait;
use machines_api::models::{GuestConfig, LogEntry, Machine};

use crate::errors::GatewayError;

pub use machines::MachinesProvisioner;

/// Everything needed to create one backend machine
#[derive(Clone)]
pub struct MachineSpec {
    pub name: String,
    pub image: String,
    /// argv, never a shell string
    pub cmd: Vec<String>,
    /// May carry credentials
    pub env: HashMap<String, String>,
    pub guest: GuestConfig,
    pub metadata: HashMap<String, String>,
}

impl std::fmt::Debug for MachineSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut env_names: Vec<&String> = self.env.keys().collect();
        env_names.sort();
        f.debug_struct("MachineSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("cmd", &self.cmd)
            .field("env", &env_names)
            .field("guest", &self.guest)
            .finish()
    }
}

/// Creates and manages isolated machines
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Create a machine and return its id
    async fn create_machine(&self, spec: MachineSpec) -> Result<String, GatewayError>;

    /// `None` when the machine does not exist
    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, GatewayError>;

    async fn start_machine(&self, id: &str) -> Result<(), GatewayError>;

    async fn stop_machine(&self, id: &str) -> Result<(), GatewayError>;

    /// Destroy a machine. Already gone counts as success.
    async fn delete_machine(&self, id: &str) -> Result<(), GatewayError>;

    async fn fetch_logs(&self, id: &str) -> Result<Vec<LogEntry>, GatewayError>;
}

/// Private network coordinates of deployed machines
#[derive(Debug, Clone)]
pub struct BackendAddress {
    pub app_name: String,
    pub port: u16,

    /// Replaces the private network address; `{machine_id}` is substituted
    pub url_template: Option<String>,
}

impl BackendAddress {
    /// Base URL of the deployment's backend, if it has a machine
    pub fn url_for(&self, deployment: &crate::models::deployment::Deployment) -> Option<String> {
        match &self.url_template {
            Some(template) => deployment
                .machine_id
                .as_ref()
                .map(|machine_id| template.replace("{machine_id}", machine_id)),
            None => deployment.private_url(&self.app_name, self.port),
        }
    }
}

impl Default for BackendAddress {
    fn default() -> Self {
        Self {
            app_name: "gangway-servers".to_string(),
            port: 8080,
            url_template: None,
        }
    }
}
