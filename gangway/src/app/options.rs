//! Application configuration options

use std::time::Duration;

use machines_api::models::GuestConfig;
use secrecy::SecretString;

use crate::bridge::forward;
use crate::compute::{machines, BackendAddress};
use crate::deploy::fsm::FsmSettings;
use crate::deploy::launch::LaunchOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::validator;
use crate::workers::{monitor, session_sweeper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Base URL clients use to reach the bridge
    pub public_url: String,

    /// Management routes require this key when set
    pub admin_api_key: Option<SecretString>,

    /// Server configuration
    pub server: ServerOptions,

    /// Enable the health monitor worker
    pub enable_monitor: bool,

    /// Health monitor options
    pub monitor: monitor::Options,

    /// Session sweeper options
    pub session_sweeper: session_sweeper::Options,

    /// Idle session lifetime
    pub session_idle: Duration,

    /// Liveness probe timeout
    pub probe_timeout: Duration,

    pub forwarder: forward::Options,
    pub validator: validator::Options,
    pub provisioner: machines::Options,
    pub launch: LaunchOptions,
    pub backend: BackendAddress,

    /// FSM deployment settings
    pub fsm_settings: FsmSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            public_url: "http://localhost:8080".to_string(),
            admin_api_key: None,
            server: ServerOptions::default(),
            enable_monitor: true,
            monitor: monitor::Options::default(),
            session_sweeper: session_sweeper::Options::default(),
            session_idle: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(5),
            forwarder: forward::Options::default(),
            validator: validator::Options::default(),
            provisioner: machines::Options::default(),
            launch: LaunchOptions::default(),
            backend: BackendAddress::default(),
            fsm_settings: FsmSettings::default(),
        }
    }
}

impl AppOptions {
    /// Build options from a loaded settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let provisioner = &settings.provisioner;

        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions {
                layout,
                persist: settings.persist,
            },
            public_url: settings.public_url.clone(),
            admin_api_key: settings.admin_api_key.clone().map(SecretString::from),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_monitor: settings.monitor.enabled,
            monitor: monitor::Options {
                interval: Duration::from_secs(settings.monitor.interval_secs),
                concurrency: settings.monitor.concurrency.max(1),
                failure_threshold: settings.monitor.failure_threshold.max(1),
            },
            session_sweeper: session_sweeper::Options::default(),
            session_idle: Duration::from_secs(settings.bridge.session_idle_secs),
            probe_timeout: Duration::from_secs(settings.monitor.probe_timeout_secs),
            forwarder: forward::Options {
                response_timeout: Duration::from_secs(settings.bridge.response_timeout_secs),
                connect_timeout: Duration::from_secs(settings.bridge.connect_timeout_secs),
            },
            validator: validator::Options {
                npm_url: settings.registries.npm_url.clone(),
                pypi_url: settings.registries.pypi_url.clone(),
                github_url: settings.registries.github_url.clone(),
                timeout: Duration::from_secs(settings.registries.timeout_secs),
            },
            provisioner: machines::Options {
                base_url: provisioner.base_url.clone(),
                app_name: provisioner.app_name.clone(),
                api_token: provisioner.api_token.clone().map(SecretString::from),
                region: provisioner.region.clone(),
                timeout: Duration::from_secs(provisioner.timeout_secs),
            },
            launch: LaunchOptions {
                image: provisioner.image.clone(),
                guest: GuestConfig {
                    cpu_kind: provisioner.cpu_kind.clone(),
                    cpus: provisioner.cpus,
                    memory_mb: provisioner.memory_mb,
                },
                backend_port: provisioner.backend_port,
            },
            backend: BackendAddress {
                app_name: provisioner.app_name.clone(),
                port: provisioner.backend_port,
                url_template: provisioner.backend_url_template.clone(),
            },
            fsm_settings: FsmSettings {
                startup_timeout: Duration::from_secs(settings.startup.timeout_secs),
                startup_poll_interval: Duration::from_secs(settings.startup.poll_interval_secs),
                failure_threshold: settings.monitor.failure_threshold.max(1),
            },
        }
    }
}

/// Lifecycle options for the gateway
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep deployments on disk across restarts
    pub persist: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist: true,
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
