//! `security.*` RPC methods: classification, injection, secrets, rate
//! limit, anomaly, and the Custom Rule Set hot-configuration surface.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use gateway_classifier::CustomRuleSet;
use gateway_core::model::Classification;
use gateway_core::GatewayError;
use gateway_injection::{DetectionResult, Sensitivity};
use gateway_ratelimit::CheckResult;
use gateway_secrets::{ScanOutput, SecretMatch, SecretsScanner};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::GatewayState;

#[derive(Deserialize)]
pub struct ClassifyRequest {
    command: String,
}

pub async fn classify(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ClassifyRequest>,
) -> Json<Classification> {
    let custom = state.orchestrator.get_compiled_custom_rules("unknown");
    Json(state.orchestrator.classifier().classify(&req.command, custom.as_deref()))
}

/// LLM-backed classification is an external collaborator per this
/// gateway's scope; no LLM backend is wired into this deployment.
pub async fn classify_with_llm(
    State(_state): State<Arc<GatewayState>>,
    Json(_req): Json<ClassifyRequest>,
) -> AppResult<Json<Classification>> {
    Err(GatewayError::InternalError("no LLM backend configured".to_string()).into())
}

#[derive(Deserialize)]
pub struct InjectionDetectRequest {
    text: String,
    sensitivity: Option<Sensitivity>,
}

pub async fn injection_detect(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<InjectionDetectRequest>,
) -> Json<DetectionResult> {
    let sensitivity = req.sensitivity.unwrap_or(state.orchestrator.injection().sensitivity);
    Json(state.orchestrator.injection().detect_with(&req.text, sensitivity))
}

#[derive(Deserialize)]
pub struct SanitizeRequest {
    text: String,
}

#[derive(Serialize)]
pub struct SanitizeResponse {
    original: String,
    sanitized: String,
    modified: bool,
}

pub async fn injection_sanitize(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SanitizeRequest>,
) -> Json<SanitizeResponse> {
    let (sanitized, modified) = state.orchestrator.injection().sanitize(&req.text);
    Json(SanitizeResponse {
        original: req.text,
        sanitized,
        modified,
    })
}

#[derive(Deserialize)]
pub struct ScanRequest {
    text: String,
}

async fn current_scanner(state: &GatewayState) -> SecretsScanner {
    let settings = state.secrets_config.read().await.clone();
    SecretsScanner::new(settings.mode, settings.enable_line_numbers, settings.max_secrets_per_type)
}

pub async fn secrets_scan(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ScanRequest>,
) -> Json<ScanOutput> {
    let scanner = current_scanner(&state).await;
    Json(scanner.scan_output(&req.text))
}

#[derive(Serialize)]
pub struct RedactResponse {
    redacted: String,
    found: bool,
    matches: Vec<SecretMatch>,
}

pub async fn secrets_redact(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ScanRequest>,
) -> Json<RedactResponse> {
    let scanner = current_scanner(&state).await;
    let matches = scanner.scan(&req.text);
    Json(RedactResponse {
        redacted: scanner.redact(&req.text),
        found: !matches.is_empty(),
        matches,
    })
}

#[derive(Deserialize, Default)]
pub struct ConfigureSecretsRequest {
    mode: Option<gateway_core::config::DetectionMode>,
    enable_line_numbers: Option<bool>,
    max_per_type: Option<usize>,
}

#[derive(Serialize)]
pub struct ConfigureSecretsResponse {
    success: bool,
    config: gateway_core::config::SecretsSettings,
}

pub async fn secrets_configure(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ConfigureSecretsRequest>,
) -> Json<ConfigureSecretsResponse> {
    let mut settings = state.secrets_config.write().await;
    if let Some(mode) = req.mode {
        settings.mode = mode;
    }
    if let Some(enable) = req.enable_line_numbers {
        settings.enable_line_numbers = enable;
    }
    if let Some(max_per_type) = req.max_per_type {
        settings.max_secrets_per_type = max_per_type;
    }
    Json(ConfigureSecretsResponse {
        success: true,
        config: settings.clone(),
    })
}

#[derive(Serialize)]
pub struct SecretsConfigResponse {
    config: gateway_core::config::SecretsSettings,
}

pub async fn secrets_get_config(State(state): State<Arc<GatewayState>>) -> Json<SecretsConfigResponse> {
    Json(SecretsConfigResponse {
        config: state.secrets_config.read().await.clone(),
    })
}

#[derive(Deserialize)]
pub struct RateLimitSubjectRequest {
    user_id: String,
    channel_id: Option<String>,
}

pub async fn rate_limit_status(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RateLimitSubjectRequest>,
) -> AppResult<Json<Option<CheckResult>>> {
    let limiter = state
        .orchestrator
        .rate_limiter()
        .ok_or_else(|| GatewayError::InternalError("rate limiter not configured".to_string()))?;
    let snapshot = limiter.peek(&req.user_id, req.channel_id.as_deref()).map(|bucket| CheckResult {
        allowed: true,
        remaining: 0,
        reset_at: bucket.reset_at,
        retry_after_ms: None,
    });
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
pub struct ResetRateLimitRequest {
    user_id: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn rate_limit_reset(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ResetRateLimitRequest>,
) -> AppResult<Json<SuccessResponse>> {
    let limiter = state
        .orchestrator
        .rate_limiter()
        .ok_or_else(|| GatewayError::InternalError("rate limiter not configured".to_string()))?;
    limiter.reset(&req.user_id);
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize)]
pub struct AnomalyAnalyzeRequest {
    user_id: String,
    command: String,
}

pub async fn anomaly_analyze(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<AnomalyAnalyzeRequest>,
) -> Json<gateway_anomaly::AnomalyResult> {
    Json(state.orchestrator.anomaly().analyze(&req.user_id, &req.command))
}

#[derive(Deserialize)]
pub struct UserIdRequest {
    user_id: String,
}

#[derive(Serialize)]
pub struct UpdateBaselineResponse {
    success: bool,
    baseline: Option<gateway_anomaly::UserBaseline>,
}

pub async fn anomaly_update_baseline(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<UserIdRequest>,
) -> Json<UpdateBaselineResponse> {
    let baseline = state.orchestrator.anomaly().update_baseline(&req.user_id);
    Json(UpdateBaselineResponse {
        success: baseline.is_some(),
        baseline,
    })
}

#[derive(Serialize)]
pub struct GetBaselineResponse {
    baseline: Option<gateway_anomaly::UserBaseline>,
}

pub async fn anomaly_get_baseline(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<UserIdRequest>,
) -> Json<GetBaselineResponse> {
    Json(GetBaselineResponse {
        baseline: state.orchestrator.anomaly().get_baseline(&req.user_id),
    })
}

#[derive(Deserialize)]
pub struct SetCustomRulesRequest {
    user_id: String,
    rules: CustomRuleSet,
}

pub async fn set_custom_rules(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<SetCustomRulesRequest>,
) -> Json<SuccessResponse> {
    state.orchestrator.set_custom_rules(req.user_id, req.rules);
    Json(SuccessResponse { success: true })
}

pub async fn get_custom_rules(
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<String>,
) -> Json<Option<CustomRuleSet>> {
    Json(state.orchestrator.get_custom_rules(&user_id))
}
