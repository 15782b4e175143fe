//! Server state

use std::sync::Arc;

use secrecy::SecretString;

use crate::bridge::forward::Forwarder;
use crate::bridge::session::SessionStore;
use crate::compute::BackendAddress;
use crate::deploy::executor::DeploymentExecutor;
use crate::validator::PackageValidator;
use crate::workers::monitor::Heartbeat;

/// Server state shared across handlers
pub struct ServerState {
    pub executor: Arc<DeploymentExecutor>,
    pub validator: Arc<PackageValidator>,
    pub sessions: Arc<dyn SessionStore>,
    pub forwarder: Arc<Forwarder>,
    pub heartbeat: Arc<Heartbeat>,
    pub backend: BackendAddress,
    /// Base of the connection URLs handed to clients
    pub public_url: String,
    /// Management routes require `X-API-Key` when set
    pub admin_api_key: Option<SecretString>,
}
