//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    deploy_project, get_deployment, get_deployment_log, health, import_project,
    list_deployments, rollback_project, update_project,
};
use crate::server::state::ServerState;

/// Build the API router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/projects/import", post(import_project))
        .route("/api/projects/:id", patch(update_project))
        .route("/api/projects/:id/deploy", post(deploy_project))
        .route("/api/projects/:id/deployments", get(list_deployments))
        .route("/api/projects/:id/rollback", post(rollback_project))
        .route("/api/deployments/:id", get(get_deployment))
        .route("/api/deployments/:id/log", get(get_deployment_log))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
///
/// Returns the join handle and the bound address (useful when the configured
/// port is 0).
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(JoinHandle<Result<(), DeployError>>, SocketAddr), DeployError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::Server(e.to_string()))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DeployError::Server(e.to_string()))?;

    info!("Starting HTTP server on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::Server(e.to_string()))
    });

    Ok((handle, local_addr))
}
