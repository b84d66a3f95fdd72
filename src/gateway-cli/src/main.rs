//! Gatekeeper server binary.

use std::process::ExitCode;

use clap::Parser;
use gateway_core::{GatewayConfig, GatewayPaths};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gateway_cli::run_with_shutdown;

/// Gatekeeper shell-command security gateway
#[derive(Parser)]
#[command(name = "gatekeeper-server")]
#[command(about = "Multi-tenant shell-command security and execution gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML). Falls back to built-in defaults.
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:7703")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    let config = if let Some(config_path) = &args.config {
        match GatewayConfig::load_or_default(std::path::Path::new(config_path)) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config from {}: {}", config_path, e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        GatewayConfig::default()
    };

    let paths = match GatewayPaths::new() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to resolve application directories: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting Gatekeeper server on {}", args.listen);
    info!("Press Ctrl+C to stop");

    let shutdown = async move {
        let ctrl_c = async {
            signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
    };

    if let Err(e) = run_with_shutdown(config, paths, &args.listen, shutdown).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Gatekeeper server stopped");
    ExitCode::SUCCESS
}
