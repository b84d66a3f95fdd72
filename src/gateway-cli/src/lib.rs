//! Gatekeeper server - HTTP RPC surface for the shell-command security
//! gateway.
//!
//! This crate wires the twelve security components together into one
//! process: Pattern Store, Secrets Scanner, Rate Limiter, Injection
//! Detector, Anomaly Detector, Classifier, Audit Log, Approval Waiter,
//! Sandbox Manager, Hook Pipeline, Cron Scheduler, and the Security
//! Orchestrator that sequences them for every `Shell` tool call.

pub mod agent;
pub mod api;
pub mod error;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use gateway_core::{GatewayConfig, GatewayPaths};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{AppError, AppResult};
pub use state::GatewayState;

/// Run the server with the given configuration and paths, no graceful
/// shutdown hook.
pub async fn run(config: GatewayConfig, paths: GatewayPaths, listen_addr: &str) -> anyhow::Result<()> {
    run_with_shutdown(config, paths, listen_addr, std::future::pending()).await
}

/// Run the server with graceful shutdown support.
pub async fn run_with_shutdown<F>(
    config: GatewayConfig,
    paths: GatewayPaths,
    listen_addr: &str,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(GatewayState::new(config, paths).await?);
    state.start_cron().await?;

    let app = create_router_with_state(Arc::clone(&state));

    let addr: SocketAddr = listen_addr.parse()?;
    info!("Starting Gatekeeper server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("Gatekeeper server shutting down, unscheduling cron jobs...");
    state.cron.unschedule_all();

    Ok(())
}

/// Create the application router.
pub fn create_router(state: GatewayState) -> Router {
    create_router_with_state(Arc::new(state))
}

pub fn create_router_with_state(state: Arc<GatewayState>) -> Router {
    Router::new()
        .nest("/api/v1", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
