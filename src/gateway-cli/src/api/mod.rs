//! RPC routes, one module per component group on the dashboard's RPC
//! surface table.

mod approvals;
mod audit;
mod cron;
mod health;
mod sandbox;
mod security;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::state::GatewayState;

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Security: classification, injection, secrets, rate limit, anomaly
        .route("/security/classify", post(security::classify))
        .route("/security/classify-with-llm", post(security::classify_with_llm))
        .route("/security/injection/detect", post(security::injection_detect))
        .route("/security/injection/sanitize", post(security::injection_sanitize))
        .route("/security/secrets/scan", post(security::secrets_scan))
        .route("/security/secrets/redact", post(security::secrets_redact))
        .route("/security/secrets/configure", post(security::secrets_configure))
        .route("/security/secrets/config", get(security::secrets_get_config))
        .route("/security/rate-limit/status", post(security::rate_limit_status))
        .route("/security/rate-limit/reset", post(security::rate_limit_reset))
        .route("/security/anomaly/analyze", post(security::anomaly_analyze))
        .route(
            "/security/anomaly/update-baseline",
            post(security::anomaly_update_baseline),
        )
        .route("/security/anomaly/baseline", post(security::anomaly_get_baseline))
        .route("/security/rules", post(security::set_custom_rules))
        .route("/security/rules/{user_id}", get(security::get_custom_rules))
        // Audit
        .route("/audit/logs", post(audit::logs))
        .route("/audit/stats", post(audit::stats))
        // Approvals
        .route("/approvals/pending", get(approvals::pending))
        .route("/approvals/{id}/approve", post(approvals::approve))
        .route("/approvals/{id}/reject", post(approvals::reject))
        // Sandbox
        .route("/sandbox/{user_id}/status", get(sandbox::status))
        .route("/sandbox/{user_id}/create", post(sandbox::create))
        .route("/sandbox/{user_id}/kill", post(sandbox::kill))
        .route("/sandbox/{user_id}/hibernate", post(sandbox::hibernate))
        // Cron
        .route("/cron/jobs", get(cron::list))
        .route("/cron/jobs", post(cron::create))
        .route("/cron/jobs/{id}", get(cron::get))
        .route("/cron/jobs/{id}", delete(cron::remove))
        .route("/cron/jobs/{id}/enable", post(cron::enable))
        .route("/cron/jobs/{id}/disable", post(cron::disable))
        .route("/cron/status", get(cron::scheduler_status))
}
