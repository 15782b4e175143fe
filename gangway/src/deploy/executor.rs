//! Deployment executor
//!
//! Drives deployments through their lifecycle: creation (credential check,
//! package admission, machine creation), restart, stop, token rotation and
//! deletion. Startup waits run as background tasks so callers return as soon
//! as the machine exists.

use std::sync::Arc;
use std::time::Duration;

use gangway_api::models::{CreateDeploymentRequest, LogLine, RuntimeKind};
use machines_api::models::LogEntry;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::session::SessionStore;
use crate::compute::{BackendAddress, ComputeProvisioner};
use crate::deploy::credentials::validate_credentials;
use crate::deploy::fsm::{DeploymentEvent, DeploymentState, FsmSettings};
use crate::deploy::launch::{machine_spec, LaunchOptions};
use crate::errors::GatewayError;
use crate::health::is_stale_write;
use crate::health::probe::{ProbeOutcome, Prober};
use crate::models::deployment::{AccessToken, CredentialSet, Deployment};
use crate::store::{DeploymentStore, LogBuffer};
use crate::validator::{Admission, PackageValidator, ValidatedPackage};

/// Collaborators the executor drives
pub struct ExecutorDeps {
    pub store: Arc<dyn DeploymentStore>,
    pub provisioner: Arc<dyn ComputeProvisioner>,
    pub validator: Arc<PackageValidator>,
    pub sessions: Arc<dyn SessionStore>,
    pub prober: Arc<Prober>,
    pub logs: Arc<LogBuffer>,
}

pub struct DeploymentExecutor {
    store: Arc<dyn DeploymentStore>,
    provisioner: Arc<dyn ComputeProvisioner>,
    validator: Arc<PackageValidator>,
    sessions: Arc<dyn SessionStore>,
    prober: Arc<Prober>,
    logs: Arc<LogBuffer>,
    launch: LaunchOptions,
    backend: BackendAddress,
    fsm_settings: FsmSettings,
}

impl DeploymentExecutor {
    pub fn new(
        deps: ExecutorDeps,
        launch: LaunchOptions,
        backend: BackendAddress,
        fsm_settings: FsmSettings,
    ) -> Self {
        Self {
            store: deps.store,
            provisioner: deps.provisioner,
            validator: deps.validator,
            sessions: deps.sessions,
            prober: deps.prober,
            logs: deps.logs,
            launch,
            backend,
            fsm_settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Look up a deployment or fail with `NotFound`
    pub async fn get(&self, id: Uuid) -> Result<Deployment, GatewayError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    pub async fn credentials(&self, id: Uuid) -> Result<CredentialSet, GatewayError> {
        Ok(self.store.credentials(id).await?.unwrap_or_default())
    }

    /// Create a deployment.
    ///
    /// Credential problems are reported before any record exists. A rejected
    /// package or a provisioner failure leaves the record in `failed` and is
    /// reported with its id. On success the record is `starting` and the
    /// plaintext token is returned exactly once.
    pub async fn create(
        &self,
        request: CreateDeploymentRequest,
    ) -> Result<(Deployment, AccessToken), GatewayError> {
        let name = request.name.trim().to_string();
        let package = request.package.trim().to_string();
        if name.is_empty() {
            return Err(GatewayError::ValidationError(
                "Deployment name cannot be empty".to_string(),
            ));
        }
        if package.is_empty() {
            return Err(GatewayError::ValidationError(
                "Package identifier cannot be empty".to_string(),
            ));
        }
        if let RuntimeKind::Custom { command } = &request.runtime {
            if command.is_empty() || command.iter().any(|arg| arg.is_empty()) {
                return Err(GatewayError::ValidationError(
                    "custom runtime requires a non-empty command".to_string(),
                ));
            }
        }

        let credentials = validate_credentials(request.credentials, &request.env_vars)?;

        let token = AccessToken::generate();
        let deployment = Deployment::new(
            name,
            package,
            request.runtime,
            request.env_vars,
            token.hash(),
        );
        let deployment = self.store.insert(deployment, credentials.clone()).await?;
        let id = deployment.id;
        info!(
            "Created deployment {} ({}, {})",
            id,
            deployment.package,
            deployment.runtime.as_str()
        );
        self.logs.record(id, "Deployment created");

        let deployment = self.store.transition(id, &DeploymentEvent::Accept).await?;
        self.logs
            .record(id, format!("Validating package {}", deployment.package));

        let package = self.admit(&deployment).await?;
        let deployment = self.provision(&deployment, &package, &credentials).await?;

        Ok((deployment, token))
    }

    /// Validate the deployment's package; on rejection the record fails
    async fn admit(&self, deployment: &Deployment) -> Result<ValidatedPackage, GatewayError> {
        let id = deployment.id;
        let admission = match self
            .validator
            .admit(&deployment.package, &deployment.runtime)
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                self.fail(id, e.to_string()).await;
                return Err(e);
            }
        };

        match admission {
            Admission::Accepted(package) => {
                self.logs.record(
                    id,
                    match package.version() {
                        Some(version) => format!("Package validated (version {})", version),
                        None => "Package validated".to_string(),
                    },
                );
                Ok(package)
            }
            Admission::Rejected(result) => {
                let reason = result
                    .message
                    .clone()
                    .unwrap_or_else(|| "package validation failed".to_string());
                warn!("Deployment {} rejected: {}", id, reason);
                self.fail(id, format!("Package validation failed: {}", reason))
                    .await;
                Err(GatewayError::PackageRejected {
                    deployment_id: id,
                    reason,
                })
            }
        }
    }

    /// Create the machine and move to `starting`
    async fn provision(
        &self,
        deployment: &Deployment,
        package: &ValidatedPackage,
        credentials: &CredentialSet,
    ) -> Result<Deployment, GatewayError> {
        let id = deployment.id;
        let spec = machine_spec(id, package, credentials, &self.launch);
        self.logs.record(id, "Creating machine");

        let machine_id = match self.provisioner.create_machine(spec).await {
            Ok(machine_id) => machine_id,
            Err(e) => {
                error!("Failed to create machine for deployment {}: {}", id, e);
                self.fail(id, "Machine creation failed".to_string()).await;
                return Err(GatewayError::ProvisioningFailed {
                    deployment_id: id,
                    message: e.to_string(),
                });
            }
        };

        let event = match deployment.state() {
            DeploymentState::Installing => DeploymentEvent::MachineCreated(machine_id.clone()),
            _ => DeploymentEvent::Restart {
                machine_id: machine_id.clone(),
            },
        };

        let updated = match self.store.transition(id, &event).await {
            Ok(updated) => updated,
            Err(e) => {
                // deleted or changed underneath us; don't leak the machine
                warn!(
                    "Deployment {} changed during provisioning, destroying machine {}: {}",
                    id, machine_id, e
                );
                if let Err(delete_err) = self.provisioner.delete_machine(&machine_id).await {
                    error!("Failed to destroy orphaned machine {}: {}", machine_id, delete_err);
                }
                return Err(e);
            }
        };

        self.logs.record(
            id,
            format!("Machine {} created, waiting for server to start", machine_id),
        );
        self.spawn_startup_watch(id);
        Ok(updated)
    }

    async fn fail(&self, id: Uuid, reason: String) {
        match self
            .store
            .transition(id, &DeploymentEvent::Fail(reason.clone()))
            .await
        {
            Ok(_) => self.logs.record(id, reason),
            Err(e) => warn!("Could not mark deployment {} failed: {}", id, e),
        }
    }

    /// Restart a stopped or failed deployment
    pub async fn restart(&self, id: Uuid) -> Result<Deployment, GatewayError> {
        let deployment = self.get(id).await?;

        match (deployment.state(), deployment.machine_id.clone()) {
            (DeploymentState::Stopped, Some(machine_id)) => {
                self.provisioner.start_machine(&machine_id).await?;
                self.resume(&deployment, machine_id).await
            }
            (DeploymentState::Failed, Some(machine_id)) => {
                match self.provisioner.get_machine(&machine_id).await? {
                    Some(machine) if !machine.state.is_gone() => {
                        if machine.state.is_stopped() {
                            self.provisioner.start_machine(&machine_id).await?;
                        }
                        self.resume(&deployment, machine_id).await
                    }
                    _ => self.reprovision(&deployment).await,
                }
            }
            (DeploymentState::Failed, None) => self.reprovision(&deployment).await,
            (state, _) => Err(GatewayError::InvalidTransition(format!(
                "cannot restart a deployment in state {}",
                state
            ))),
        }
    }

    async fn resume(
        &self,
        deployment: &Deployment,
        machine_id: String,
    ) -> Result<Deployment, GatewayError> {
        let updated = self
            .store
            .compare_and_transition(
                deployment.id,
                deployment.version,
                &DeploymentEvent::Restart {
                    machine_id: machine_id.clone(),
                },
            )
            .await?;
        info!("Restarting deployment {} on machine {}", deployment.id, machine_id);
        self.logs
            .record(deployment.id, format!("Restarting machine {}", machine_id));
        self.spawn_startup_watch(deployment.id);
        Ok(updated)
    }

    /// Admit the package again and create a fresh machine
    async fn reprovision(&self, deployment: &Deployment) -> Result<Deployment, GatewayError> {
        info!("Recreating machine for deployment {}", deployment.id);
        self.logs.record(deployment.id, "Recreating machine");

        let package = self.admit(deployment).await?;
        let credentials = self.credentials(deployment.id).await?;
        // re-read: admission may have rewritten the failure reason
        let current = self.get(deployment.id).await?;
        self.provision(&current, &package, &credentials).await
    }

    /// Stop a running or unhealthy deployment's machine
    pub async fn stop(&self, id: Uuid) -> Result<Deployment, GatewayError> {
        let deployment = self.get(id).await?;
        if !deployment.state().is_live() {
            return Err(GatewayError::InvalidTransition(format!(
                "cannot stop a deployment in state {}",
                deployment.state()
            )));
        }
        let machine_id = deployment
            .machine_id
            .clone()
            .ok_or_else(|| GatewayError::Internal(format!("deployment {} has no machine", id)))?;

        self.provisioner.stop_machine(&machine_id).await?;
        let updated = self
            .store
            .compare_and_transition(id, deployment.version, &DeploymentEvent::MachineStopped)
            .await?;

        info!("Stopped deployment {}", id);
        self.logs.record(id, format!("Machine {} stopped", machine_id));
        Ok(updated)
    }

    /// Destroy the machine and remove every trace of the deployment.
    ///
    /// A machine that is already gone is not an error. A second delete of the
    /// same id returns `NotFound`.
    pub async fn delete(&self, id: Uuid) -> Result<(), GatewayError> {
        let deployment = self.get(id).await?;

        if let Some(machine_id) = &deployment.machine_id {
            self.provisioner.delete_machine(machine_id).await?;
        }

        if self.store.remove(id).await?.is_none() {
            return Err(GatewayError::NotFound(id.to_string()));
        }

        let purged = self.sessions.purge_deployment(id);
        self.logs.remove(id);
        info!("Deleted deployment {} ({} sessions closed)", id, purged);
        Ok(())
    }

    /// Issue a new token; the previous one stops working immediately
    pub async fn rotate_token(&self, id: Uuid) -> Result<AccessToken, GatewayError> {
        let token = AccessToken::generate();
        self.store.replace_token_hash(id, token.hash()).await?;
        info!("Rotated access token for deployment {}", id);
        self.logs.record(id, "Access token rotated");
        Ok(token)
    }

    /// Retained log lines, refreshed from the provisioner when possible
    pub async fn logs_for(&self, id: Uuid) -> Result<Vec<LogLine>, GatewayError> {
        let deployment = self.get(id).await?;

        if let Some(machine_id) = &deployment.machine_id {
            match self.provisioner.fetch_logs(machine_id).await {
                Ok(entries) => self.append_machine_logs(id, entries),
                Err(e) => warn!("Could not fetch logs for machine {}: {}", machine_id, e),
            }
        }

        Ok(self.logs.get(id))
    }

    fn append_machine_logs(&self, id: Uuid, entries: Vec<LogEntry>) {
        let last_seen = self
            .logs
            .get(id)
            .iter()
            .filter(|line| line.stream != "gateway")
            .map(|line| line.timestamp)
            .max();

        let fresh: Vec<LogLine> = entries
            .into_iter()
            .filter(|entry| last_seen.map_or(true, |seen| entry.timestamp > seen))
            .map(|entry| LogLine {
                timestamp: entry.timestamp,
                stream: match entry.stream {
                    machines_api::models::LogStream::Stdout => "stdout".to_string(),
                    machines_api::models::LogStream::Stderr => "stderr".to_string(),
                },
                message: entry.message,
            })
            .collect();

        debug!("Appending {} machine log lines for deployment {}", fresh.len(), id);
        self.logs.append(id, fresh);
    }

    /// Pick up records left mid-flight by a previous process. `starting`
    /// deployments get a new startup watch; `pending` and `installing` ones
    /// lost their provisioning task and are failed. Returns the number of
    /// watches started.
    pub async fn resume_startup_watches(&self) -> Result<usize, GatewayError> {
        let mut resumed = 0;
        for deployment in self.store.list().await? {
            match deployment.state() {
                DeploymentState::Starting => {
                    self.spawn_startup_watch(deployment.id);
                    resumed += 1;
                }
                DeploymentState::Pending | DeploymentState::Installing => {
                    let event =
                        DeploymentEvent::Fail("Gateway restarted during provisioning".to_string());
                    match self
                        .store
                        .compare_and_transition(deployment.id, deployment.version, &event)
                        .await
                    {
                        Ok(_) => self
                            .logs
                            .record(deployment.id, "Provisioning interrupted by gateway restart"),
                        Err(e) => warn!("Could not fail interrupted deployment {}: {}", deployment.id, e),
                    }
                }
                _ => {}
            }
        }
        Ok(resumed)
    }

    fn spawn_startup_watch(&self, id: Uuid) {
        let watch = StartupWatch {
            store: self.store.clone(),
            prober: self.prober.clone(),
            logs: self.logs.clone(),
            backend: self.backend.clone(),
            timeout: self.fsm_settings.startup_timeout,
            poll_interval: self.fsm_settings.startup_poll_interval,
        };
        tokio::spawn(async move {
            watch.run(id, tokio::time::sleep).await;
        });
    }
}

/// Polls a starting deployment until it answers or the window closes
pub struct StartupWatch {
    pub store: Arc<dyn DeploymentStore>,
    pub prober: Arc<Prober>,
    pub logs: Arc<LogBuffer>,
    pub backend: BackendAddress,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl StartupWatch {
    pub async fn run<S, F>(&self, id: Uuid, sleep_fn: S)
    where
        S: Fn(Duration) -> F,
        F: std::future::Future<Output = ()>,
    {
        let deadline = Instant::now() + self.timeout;

        loop {
            let deployment = match self.store.get(id).await {
                Ok(Some(deployment)) => deployment,
                Ok(None) => return,
                Err(e) => {
                    error!("Startup watch for {} could not read the store: {}", id, e);
                    return;
                }
            };
            if deployment.state() != DeploymentState::Starting {
                debug!("Startup watch for {} ended: now {}", id, deployment.state());
                return;
            }

            let healthy = match self.backend.url_for(&deployment) {
                Some(url) => self.prober.probe(&url).await == ProbeOutcome::Healthy,
                None => false,
            };

            let event = if healthy {
                Some(DeploymentEvent::ProbeSucceeded)
            } else if Instant::now() >= deadline {
                Some(DeploymentEvent::StartupTimedOut)
            } else {
                None
            };

            if let Some(event) = event {
                match self
                    .store
                    .compare_and_transition(id, deployment.version, &event)
                    .await
                {
                    Ok(updated) => {
                        info!("Deployment {} is now {}", id, updated.state());
                        self.logs.record(
                            id,
                            match updated.state() {
                                DeploymentState::Running => "Server is healthy".to_string(),
                                state => format!("Server did not become healthy ({})", state),
                            },
                        );
                        return;
                    }
                    // someone else moved the record; look again
                    Err(e) if is_stale_write(&e) => continue,
                    Err(e) => {
                        error!("Startup watch for {} failed to write: {}", id, e);
                        return;
                    }
                }
            }

            sleep_fn(self.poll_interval).await;
        }
    }
}
