//! Health monitor worker
//!
//! Every interval, checks each `running` or `unhealthy` deployment in its own
//! task (bounded by a semaphore) and writes the resulting lifecycle event
//! with the version read before the probe.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gangway_api::models::MonitorStatus;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::compute::{BackendAddress, ComputeProvisioner};
use crate::deploy::fsm::DeploymentEvent;
use crate::health::probe::Prober;
use crate::health::{check, is_stale_write};
use crate::models::deployment::Deployment;
use crate::store::{DeploymentStore, LogBuffer};

/// Monitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between cycles
    pub interval: Duration,

    /// Checks running at once
    pub concurrency: usize,

    /// Consecutive failed probes before `unhealthy`
    pub failure_threshold: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            concurrency: 8,
            failure_threshold: 1,
        }
    }
}

/// Cycle counters exposed at `/health`
#[derive(Default)]
pub struct Heartbeat {
    cycles: AtomicU64,
    last_checked: AtomicUsize,
    started_at: RwLock<Option<DateTime<Utc>>>,
    finished_at: RwLock<Option<DateTime<Utc>>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    fn cycle_started(&self) {
        let mut started_at = self.started_at.write().unwrap_or_else(|e| e.into_inner());
        *started_at = Some(Utc::now());
    }

    fn cycle_finished(&self, checked: usize) {
        self.last_checked.store(checked, Ordering::SeqCst);
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let mut finished_at = self.finished_at.write().unwrap_or_else(|e| e.into_inner());
        *finished_at = Some(Utc::now());
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            cycles: self.cycles.load(Ordering::SeqCst),
            last_cycle_started_at: *self.started_at.read().unwrap_or_else(|e| e.into_inner()),
            last_cycle_finished_at: *self.finished_at.read().unwrap_or_else(|e| e.into_inner()),
            last_cycle_checked: self.last_checked.load(Ordering::SeqCst),
        }
    }
}

/// What a monitor cycle needs
#[derive(Clone)]
pub struct Monitor {
    pub store: Arc<dyn DeploymentStore>,
    pub provisioner: Arc<dyn ComputeProvisioner>,
    pub prober: Arc<Prober>,
    pub logs: Arc<LogBuffer>,
    pub heartbeat: Arc<Heartbeat>,
    pub backend: BackendAddress,
}

impl Monitor {
    /// Check every live deployment once; returns how many were checked
    pub async fn run_cycle(&self, options: &Options) -> usize {
        self.heartbeat.cycle_started();

        let deployments = match self.store.list().await {
            Ok(deployments) => deployments,
            Err(e) => {
                error!("Health monitor could not list deployments: {}", e);
                self.heartbeat.cycle_finished(0);
                return 0;
            }
        };

        let live: Vec<Deployment> = deployments
            .into_iter()
            .filter(|d| d.state().is_live())
            .collect();
        debug!("Health monitor checking {} deployments", live.len());

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(live.len());

        for deployment in live {
            let sem = Arc::clone(&semaphore);
            let monitor = self.clone();
            let threshold = options.failure_threshold;
            let id = deployment.id;
            handles.push((
                id,
                tokio::spawn(async move {
                    let Ok(_permit) = sem.acquire().await else {
                        return;
                    };
                    monitor.check_one(deployment, threshold).await;
                }),
            ));
        }

        let checked = handles.len();
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                error!("Health check for deployment {} panicked: {}", id, e);
            }
        }

        self.heartbeat.cycle_finished(checked);
        checked
    }

    async fn check_one(&self, deployment: Deployment, failure_threshold: u32) {
        let id = deployment.id;
        let before = deployment.state();
        let event = check(
            &deployment,
            &self.prober,
            self.provisioner.as_ref(),
            &self.backend,
            failure_threshold,
        )
        .await;

        match self
            .store
            .compare_and_transition(id, deployment.version, &event)
            .await
        {
            Ok(updated) if updated.state() != before => {
                info!("Deployment {} moved {} -> {}", id, before, updated.state());
                let line = match &event {
                    DeploymentEvent::Fail(reason) => format!("Deployment failed: {}", reason),
                    _ => format!("Health check: {} -> {}", before, updated.state()),
                };
                self.logs.record(id, line);
            }
            Ok(_) => debug!("Deployment {} still {}", id, before),
            Err(e) if is_stale_write(&e) => {}
            Err(e) => warn!("Could not record health of deployment {}: {}", id, e),
        }
    }
}

/// Run the monitor worker
pub async fn run<S, F>(
    options: &Options,
    monitor: &Monitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health monitor starting (interval {:?})...", options.interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        // a cycle in flight is abandoned on shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            checked = monitor.run_cycle(options) => {
                debug!("Health monitor cycle complete ({} checked)", checked);
            }
        }
    }
}
