//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::GatewayError;
use crate::server::serve::serve;
use crate::workers::{monitor, session_sweeper};

/// Run the gateway
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    info!("Initializing Gangway...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start gateway: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, GatewayError> {
    let app_state = Arc::new(AppState::init(options).await?);

    resume_startup_watches(&app_state).await;

    init_session_sweeper(
        options.session_sweeper.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_monitor {
        init_monitor_worker(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;

    Ok(app_state)
}

/// Deployments loaded in `starting` get a fresh startup watch
async fn resume_startup_watches(app_state: &AppState) {
    match app_state.executor.resume_startup_watches().await {
        Ok(0) => {}
        Ok(count) => info!("Resumed startup watch for {} deployments", count),
        Err(e) => error!("Failed to resume startup watches: {}", e),
    }
}

fn init_monitor_worker(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing health monitor...");

    let worker = app_state.monitor(options);
    let monitor_options = options.monitor.clone();

    let monitor_handle = tokio::spawn(async move {
        monitor::run(
            &monitor_options,
            &worker,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_monitor_worker_handle(monitor_handle)
}

fn init_session_sweeper(
    options: session_sweeper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing session sweeper...");

    let sessions = app_state.sessions.clone();

    let sweeper_handle = tokio::spawn(async move {
        session_sweeper::run(
            &options,
            sessions.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_session_sweeper_handle(sweeper_handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing HTTP server...");

    let server_state = app_state.server_state(options);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), GatewayError>>>,
    monitor_worker_handle: Option<JoinHandle<()>>,
    session_sweeper_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            monitor_worker_handle: None,
            session_sweeper_handle: None,
        }
    }

    pub fn with_monitor_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), GatewayError> {
        if self.monitor_worker_handle.is_some() {
            return Err(GatewayError::ShutdownError("monitor_handle already set".to_string()));
        }
        self.monitor_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_session_sweeper_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), GatewayError> {
        if self.session_sweeper_handle.is_some() {
            return Err(GatewayError::ShutdownError("sweeper_handle already set".to_string()));
        }
        self.session_sweeper_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), GatewayError>>,
    ) -> Result<(), GatewayError> {
        if self.server_handle.is_some() {
            return Err(GatewayError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), GatewayError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), GatewayError> {
        info!("Shutting down Gangway...");

        // 1. Server stops accepting requests
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| GatewayError::ShutdownError(e.to_string()))??;
        }

        // 2. Health monitor
        if let Some(handle) = self.monitor_worker_handle.take() {
            handle.await.map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        // 3. Session sweeper
        if let Some(handle) = self.session_sweeper_handle.take() {
            handle.await.map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
