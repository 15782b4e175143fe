//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::bridge::forward::Forwarder;
use crate::bridge::session::{InMemorySessionStore, SessionStore};
use crate::cache::validation::InMemoryValidationCache;
use crate::compute::machines::MachinesProvisioner;
use crate::compute::ComputeProvisioner;
use crate::deploy::executor::{DeploymentExecutor, ExecutorDeps};
use crate::errors::GatewayError;
use crate::health::probe::Prober;
use crate::server::state::ServerState;
use crate::store::{DeploymentStore, FileStore, LogBuffer, MemoryStore};
use crate::validator::PackageValidator;
use crate::workers::monitor::{Heartbeat, Monitor};

/// Main application state
pub struct AppState {
    pub store: Arc<dyn DeploymentStore>,
    pub provisioner: Arc<dyn ComputeProvisioner>,
    pub validator: Arc<PackageValidator>,
    pub sessions: Arc<dyn SessionStore>,
    pub prober: Arc<Prober>,
    pub forwarder: Arc<Forwarder>,
    pub logs: Arc<LogBuffer>,
    pub heartbeat: Arc<Heartbeat>,
    pub executor: Arc<DeploymentExecutor>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, GatewayError> {
        info!("Initializing application state...");

        let store: Arc<dyn DeploymentStore> = if options.storage.persist {
            let layout = &options.storage.layout;
            layout.setup().await?;
            Arc::new(FileStore::open(layout.deployments_file(), layout.credentials_file()).await?)
        } else {
            info!("Persistence disabled, deployments live in memory only");
            Arc::new(MemoryStore::new())
        };

        let provisioner: Arc<dyn ComputeProvisioner> =
            Arc::new(MachinesProvisioner::new(options.provisioner.clone())?);

        Self::with_components(options, store, provisioner)
    }

    /// Wire the remaining components around a store and provisioner
    pub fn with_components(
        options: &AppOptions,
        store: Arc<dyn DeploymentStore>,
        provisioner: Arc<dyn ComputeProvisioner>,
    ) -> Result<Self, GatewayError> {
        let validator = Arc::new(PackageValidator::new(
            options.validator.clone(),
            Arc::new(InMemoryValidationCache::default()),
        )?);
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(options.session_idle));
        let prober = Arc::new(Prober::new(options.probe_timeout)?);
        let forwarder = Arc::new(Forwarder::new(options.forwarder.clone())?);
        let logs = Arc::new(LogBuffer::default());
        let heartbeat = Arc::new(Heartbeat::new());

        let executor = Arc::new(DeploymentExecutor::new(
            ExecutorDeps {
                store: store.clone(),
                provisioner: provisioner.clone(),
                validator: validator.clone(),
                sessions: sessions.clone(),
                prober: prober.clone(),
                logs: logs.clone(),
            },
            options.launch.clone(),
            options.backend.clone(),
            options.fsm_settings.clone(),
        ));

        Ok(Self {
            store,
            provisioner,
            validator,
            sessions,
            prober,
            forwarder,
            logs,
            heartbeat,
            executor,
        })
    }

    /// Health monitor over this state
    pub fn monitor(&self, options: &AppOptions) -> Monitor {
        Monitor {
            store: self.store.clone(),
            provisioner: self.provisioner.clone(),
            prober: self.prober.clone(),
            logs: self.logs.clone(),
            heartbeat: self.heartbeat.clone(),
            backend: options.backend.clone(),
        }
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self, options: &AppOptions) -> ServerState {
        ServerState {
            executor: self.executor.clone(),
            validator: self.validator.clone(),
            sessions: self.sessions.clone(),
            forwarder: self.forwarder.clone(),
            heartbeat: self.heartbeat.clone(),
            backend: options.backend.clone(),
            public_url: options.public_url.clone(),
            admin_api_key: options.admin_api_key.clone(),
        }
    }
}
