//! Finite State Machine for the deployment lifecycle

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// How long a freshly started machine has to pass its first probe
    pub startup_timeout: Duration,

    /// Delay between probes while waiting for startup
    pub startup_poll_interval: Duration,

    /// Consecutive failed probes before `running` flips to `unhealthy`
    pub failure_threshold: u32,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            startup_poll_interval: Duration::from_secs(2),
            failure_threshold: 1,
        }
    }
}

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Accepted, nothing done yet
    Pending,

    /// Validating and creating the backend machine
    Installing,

    /// Machine exists, waiting for its first successful probe
    Starting,

    /// Liveness probe passing
    Running,

    /// Liveness probe failing while the machine still exists
    Unhealthy,

    /// Machine deliberately stopped
    Stopped,

    /// Unrecoverable setup error
    Failed,
}

impl DeploymentState {
    pub const ALL: [DeploymentState; 7] = [
        DeploymentState::Pending,
        DeploymentState::Installing,
        DeploymentState::Starting,
        DeploymentState::Running,
        DeploymentState::Unhealthy,
        DeploymentState::Stopped,
        DeploymentState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Installing => "installing",
            DeploymentState::Starting => "starting",
            DeploymentState::Running => "running",
            DeploymentState::Unhealthy => "unhealthy",
            DeploymentState::Stopped => "stopped",
            DeploymentState::Failed => "failed",
        }
    }

    /// States the bridge forwards in and the health monitor watches
    pub fn is_live(&self) -> bool {
        matches!(self, DeploymentState::Running | DeploymentState::Unhealthy)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Creation request accepted
    Accept,

    /// Provisioner confirmed the machine object exists
    MachineCreated(String),

    /// Liveness probe returned 200
    ProbeSucceeded,

    /// Startup wait elapsed without a successful probe
    StartupTimedOut,

    /// Liveness probe failed while the machine is still present
    ProbeFailed { threshold: u32 },

    /// Provisioner reports the machine as deliberately stopped
    MachineStopped,

    /// Explicit restart of a stopped or failed deployment
    Restart { machine_id: String },

    /// Unrecoverable error
    Fail(String),
}

/// Lifecycle FSM carried by every deployment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    state: DeploymentState,
    message: Option<String>,
    error: Option<String>,
    consecutive_failures: u32,
    ever_healthy: bool,
}

impl Lifecycle {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            message: None,
            error: None,
            consecutive_failures: 0,
            ever_healthy: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Human-readable progress message
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Failed probes since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether any probe has ever passed
    pub fn ever_healthy(&self) -> bool {
        self.ever_healthy
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: &DeploymentEvent) -> Result<DeploymentState, String> {
        use DeploymentEvent as E;
        use DeploymentState as S;

        let new_state = match (self.state, event) {
            // From Pending
            (S::Pending, E::Accept) => {
                self.message = Some("Validating package".to_string());
                S::Installing
            }

            // From Installing
            (S::Installing, E::MachineCreated(_)) => {
                self.message = Some("Machine created, waiting for server to start".to_string());
                S::Starting
            }

            // Probe results
            (S::Starting | S::Running | S::Unhealthy, E::ProbeSucceeded) => {
                self.consecutive_failures = 0;
                self.ever_healthy = true;
                self.error = None;
                self.message = Some("Server is healthy".to_string());
                S::Running
            }
            (S::Running | S::Unhealthy, E::ProbeFailed { threshold }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= (*threshold).max(1) {
                    self.message = Some(format!(
                        "Liveness probe failed {} time(s) in a row",
                        self.consecutive_failures
                    ));
                    S::Unhealthy
                } else {
                    self.state
                }
            }

            // From Starting
            (S::Starting, E::StartupTimedOut) => {
                if self.ever_healthy {
                    self.message = Some("Server did not become healthy after restart".to_string());
                    S::Unhealthy
                } else {
                    self.error = Some("Server never passed a liveness probe".to_string());
                    self.message = None;
                    S::Failed
                }
            }

            // Deliberate stop
            (S::Running | S::Unhealthy, E::MachineStopped) => {
                self.consecutive_failures = 0;
                self.message = Some("Machine stopped".to_string());
                S::Stopped
            }

            // Restart
            (S::Stopped | S::Failed, E::Restart { .. }) => {
                self.error = None;
                self.consecutive_failures = 0;
                self.message = Some("Restarting".to_string());
                S::Starting
            }

            (_, E::Fail(reason)) => {
                self.error = Some(reason.clone());
                self.message = None;
                S::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
