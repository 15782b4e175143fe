//! Backend health checks
//!
//! A check turns one probe (and, when the backend is unreachable, one
//! provisioner lookup) into a lifecycle event. Callers write the event with
//! the version they read before probing, so a result computed against a
//! record that has since changed is dropped.

pub mod probe;

use tracing::{debug, warn};

use crate::compute::{BackendAddress, ComputeProvisioner};
use crate::deploy::fsm::DeploymentEvent;
use crate::errors::GatewayError;
use crate::health::probe::{ProbeOutcome, Prober};
use crate::models::deployment::Deployment;

pub const MACHINE_GONE: &str = "backend machine no longer exists";

/// Decide which event a health check of `deployment` produces
pub async fn check(
    deployment: &Deployment,
    prober: &Prober,
    provisioner: &dyn ComputeProvisioner,
    backend: &BackendAddress,
    failure_threshold: u32,
) -> DeploymentEvent {
    let (Some(url), Some(machine_id)) = (backend.url_for(deployment), deployment.machine_id.as_deref())
    else {
        return DeploymentEvent::Fail(MACHINE_GONE.to_string());
    };

    match prober.probe(&url).await {
        ProbeOutcome::Healthy => DeploymentEvent::ProbeSucceeded,
        ProbeOutcome::BadStatus(_) => DeploymentEvent::ProbeFailed {
            threshold: failure_threshold,
        },
        ProbeOutcome::Unreachable => match provisioner.get_machine(machine_id).await {
            Ok(None) => DeploymentEvent::Fail(MACHINE_GONE.to_string()),
            Ok(Some(machine)) if machine.state.is_gone() => {
                DeploymentEvent::Fail(MACHINE_GONE.to_string())
            }
            Ok(Some(machine)) if machine.state.is_stopped() => DeploymentEvent::MachineStopped,
            Ok(Some(_)) => DeploymentEvent::ProbeFailed {
                threshold: failure_threshold,
            },
            Err(e) => {
                warn!(
                    "Could not query machine {} for deployment {}: {}",
                    machine_id, deployment.id, e
                );
                DeploymentEvent::ProbeFailed {
                    threshold: failure_threshold,
                }
            }
        },
    }
}

/// Whether a failed conditional write just means the record moved on
pub fn is_stale_write(err: &GatewayError) -> bool {
    let stale = matches!(
        err,
        GatewayError::Conflict(_) | GatewayError::NotFound(_) | GatewayError::InvalidTransition(_)
    );
    if stale {
        debug!("Dropping stale health result: {}", err);
    }
    stale
}
