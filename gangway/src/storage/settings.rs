//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::GatewayError;
use crate::logs::LogLevel;

pub const ENV_MACHINES_API_TOKEN: &str = "GANGWAY_MACHINES_API_TOKEN";
pub const ENV_PUBLIC_URL: &str = "GANGWAY_PUBLIC_URL";
pub const ENV_ADMIN_API_KEY: &str = "GANGWAY_ADMIN_API_KEY";

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Base URL clients use to reach the bridge
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Required in `X-API-Key` on management routes when set
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// Persist deployments to disk; in-memory only when false
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub provisioner: ProvisionerSettings,

    #[serde(default)]
    pub registries: RegistrySettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub bridge: BridgeSettings,

    #[serde(default)]
    pub startup: StartupSettings,
}

fn default_true() -> bool {
    true
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            public_url: default_public_url(),
            admin_api_key: None,
            persist: true,
            server: ServerSettings::default(),
            provisioner: ProvisionerSettings::default(),
            registries: RegistrySettings::default(),
            monitor: MonitorSettings::default(),
            bridge: BridgeSettings::default(),
            startup: StartupSettings::default(),
        }
    }
}

impl Settings {
    /// Apply environment overrides for secrets and deploy-specific values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Reject settings the gateway cannot start with
    pub fn validate(&self) -> Result<(), GatewayError> {
        for (key, value) in [
            ("public_url", &self.public_url),
            ("provisioner.base_url", &self.provisioner.base_url),
            ("registries.npm_url", &self.registries.npm_url),
            ("registries.pypi_url", &self.registries.pypi_url),
            ("registries.github_url", &self.registries.github_url),
        ] {
            let url = Url::parse(value)
                .map_err(|e| GatewayError::ConfigError(format!("{}: {}", key, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(GatewayError::ConfigError(format!(
                    "{}: unsupported scheme '{}'",
                    key,
                    url.scheme()
                )));
            }
        }

        if self.provisioner.app_name.trim().is_empty() {
            return Err(GatewayError::ConfigError(
                "provisioner.app_name must not be empty".to_string(),
            ));
        }
        if self.monitor.concurrency == 0 {
            return Err(GatewayError::ConfigError(
                "monitor.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(ENV_MACHINES_API_TOKEN) {
            self.provisioner.api_token = Some(token);
        }
        if let Some(url) = non_empty(ENV_PUBLIC_URL) {
            self.public_url = url;
        }
        if let Some(key) = non_empty(ENV_ADMIN_API_KEY) {
            self.admin_api_key = Some(key);
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Compute provisioner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerSettings {
    /// Machines API base URL
    #[serde(default = "default_machines_url")]
    pub base_url: String,

    /// App the machines are created under
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// API token; prefer the environment override
    #[serde(default)]
    pub api_token: Option<String>,

    /// Base image with node and uv preinstalled
    #[serde(default = "default_image")]
    pub image: String,

    /// Port the MCP server listens on inside the machine
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// Reach backends here instead of the private network, `{machine_id}` substituted
    #[serde(default)]
    pub backend_url_template: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_cpu_kind")]
    pub cpu_kind: String,

    #[serde(default = "default_cpus")]
    pub cpus: u32,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,

    #[serde(default = "default_provisioner_timeout")]
    pub timeout_secs: u64,
}

fn default_machines_url() -> String {
    "https://api.machines.dev/v1".to_string()
}

fn default_app_name() -> String {
    "gangway-servers".to_string()
}

fn default_image() -> String {
    "ghcr.io/gangway/mcp-runner:latest".to_string()
}

fn default_backend_port() -> u16 {
    8080
}

fn default_cpu_kind() -> String {
    "shared".to_string()
}

fn default_cpus() -> u32 {
    1
}

fn default_memory_mb() -> u32 {
    256
}

fn default_provisioner_timeout() -> u64 {
    30
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            base_url: default_machines_url(),
            app_name: default_app_name(),
            api_token: None,
            image: default_image(),
            backend_port: default_backend_port(),
            backend_url_template: None,
            region: None,
            cpu_kind: default_cpu_kind(),
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
            timeout_secs: default_provisioner_timeout(),
        }
    }
}

/// Package registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_npm_url")]
    pub npm_url: String,

    #[serde(default = "default_pypi_url")]
    pub pypi_url: String,

    #[serde(default = "default_github_url")]
    pub github_url: String,

    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_npm_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_pypi_url() -> String {
    "https://pypi.org/pypi".to_string()
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

fn default_registry_timeout() -> u64 {
    5
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            npm_url: default_npm_url(),
            pypi_url: default_pypi_url(),
            github_url: default_github_url(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_monitor_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Consecutive failed probes before a deployment is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_monitor_concurrency() -> usize {
    8
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    1
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_monitor_interval(),
            concurrency: default_monitor_concurrency(),
            probe_timeout_secs: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Protocol bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// How long to wait for backend response headers
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle sessions are discarded after this long
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

fn default_response_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_session_idle() -> u64 {
    3600
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            session_idle_secs: default_session_idle(),
        }
    }
}

/// Startup watch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSettings {
    #[serde(default = "default_startup_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_startup_poll")]
    pub poll_interval_secs: u64,
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_startup_poll() -> u64 {
    2
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_startup_timeout(),
            poll_interval_secs: default_startup_poll(),
        }
    }
}
