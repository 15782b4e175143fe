//! Machines API provisioner

use std::time::Duration;

use async_trait::async_trait;
use machines_api::models::{
    CreateMachineRequest, InitConfig, LogEntry, Machine, MachineConfig, RestartConfig,
};
use secrecy::SecretString;
use tracing::{debug, info};

use crate::compute::{ComputeProvisioner, MachineSpec};
use crate::errors::GatewayError;
use crate::http::client::HttpClient;

/// Provisioner options
#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: String,
    pub app_name: String,
    pub api_token: Option<SecretString>,
    pub region: Option<String>,
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            base_url: "https://api.machines.dev/v1".to_string(),
            app_name: "gangway-servers".to_string(),
            api_token: None,
            region: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`ComputeProvisioner`] over the Machines REST API
pub struct MachinesProvisioner {
    client: HttpClient,
    app_name: String,
    region: Option<String>,
}

impl MachinesProvisioner {
    pub fn new(options: Options) -> Result<Self, GatewayError> {
        let client = HttpClient::new(&options.base_url, options.api_token, options.timeout)?;
        Ok(Self {
            client,
            app_name: options.app_name,
            region: options.region,
        })
    }
}

#[async_trait]
impl ComputeProvisioner for MachinesProvisioner {
    async fn create_machine(&self, spec: MachineSpec) -> Result<String, GatewayError> {
        debug!("Creating machine: {:?}", spec);

        let request = CreateMachineRequest {
            name: Some(spec.name),
            region: self.region.clone(),
            config: MachineConfig {
                image: spec.image,
                guest: spec.guest,
                env: spec.env,
                init: InitConfig { cmd: spec.cmd },
                restart: RestartConfig::default(),
                metadata: spec.metadata,
            },
        };

        let machine = self.client.create_machine(&self.app_name, &request).await?;
        info!("Created machine {} in app {}", machine.id, self.app_name);
        Ok(machine.id)
    }

    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, GatewayError> {
        self.client.get_machine(&self.app_name, id).await
    }

    async fn start_machine(&self, id: &str) -> Result<(), GatewayError> {
        self.client.start_machine(&self.app_name, id).await
    }

    async fn stop_machine(&self, id: &str) -> Result<(), GatewayError> {
        self.client.stop_machine(&self.app_name, id).await
    }

    async fn delete_machine(&self, id: &str) -> Result<(), GatewayError> {
        if !self.client.destroy_machine(&self.app_name, id).await? {
            info!("Machine {} was already gone", id);
        }
        Ok(())
    }

    async fn fetch_logs(&self, id: &str) -> Result<Vec<LogEntry>, GatewayError> {
        self.client.get_machine_logs(&self.app_name, id).await
    }
}
