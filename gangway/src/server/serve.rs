//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::bridge::handler::mcp_handler;
use crate::errors::GatewayError;
use crate::server::handlers::{
    clear_validation_cache_handler, create_deployment_handler, delete_deployment_handler,
    deployment_logs_handler, get_deployment_handler, health_handler,
    invalidate_validation_cache_handler, list_deployments_handler, require_admin_key,
    restart_deployment_handler, rotate_token_handler, stop_deployment_handler,
    validate_package_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    let management = Router::new()
        // Deployments
        .route(
            "/api/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route(
            "/api/deployments/{id}",
            get(get_deployment_handler).delete(delete_deployment_handler),
        )
        .route("/api/deployments/{id}/restart", post(restart_deployment_handler))
        .route("/api/deployments/{id}/stop", post(stop_deployment_handler))
        .route("/api/deployments/{id}/token/rotate", post(rotate_token_handler))
        .route("/api/deployments/{id}/logs", get(deployment_logs_handler))
        // Packages
        .route("/api/packages/validate", post(validate_package_handler))
        .route("/api/packages/cache", delete(clear_validation_cache_handler))
        .route(
            "/api/packages/cache/{runtime}/{*identifier}",
            delete(invalidate_validation_cache_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_key,
        ));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Bridge
        .route("/mcp/{deployment_id}", get(mcp_handler).post(mcp_handler))
        .merge(management)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), GatewayError>>, GatewayError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))
    });

    Ok(handle)
}
