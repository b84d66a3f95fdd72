//! `cron.*` RPC methods: scheduled job CRUD plus scheduler status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use gateway_core::GatewayError;
use gateway_cron::CronJob;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::GatewayState;

pub async fn list(State(state): State<Arc<GatewayState>>) -> Json<Vec<CronJob>> {
    Json(state.cron.jobs().await)
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    user_id: String,
    name: String,
    cron_expression: String,
    command: String,
    channel_id: String,
    description: Option<String>,
    timezone: Option<String>,
}

pub async fn create(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<CreateJobRequest>,
) -> AppResult<Json<CronJob>> {
    let mut job = CronJob::new(req.user_id, req.name, req.cron_expression, req.command, req.channel_id);
    job.description = req.description;
    job.timezone = req.timezone;

    state.cron.store().save(job.clone()).await?;
    state.cron.schedule(&job.id).await?;
    Ok(Json(job))
}

pub async fn get(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> AppResult<Json<CronJob>> {
    state
        .cron
        .store()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("cron job {id}")).into())
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn remove(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> AppResult<Json<SuccessResponse>> {
    state.cron.unschedule(&id);
    state.cron.store().delete(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn set_enabled(state: &GatewayState, id: &str, enabled: bool) -> AppResult<CronJob> {
    let mut job = state
        .cron
        .store()
        .get(id)
        .await
        .ok_or_else(|| GatewayError::NotFound(format!("cron job {id}")))?;
    job.enabled = enabled;
    job.updated_at = gateway_core::now();
    state.cron.store().save(job.clone()).await?;

    if enabled {
        state.cron.schedule(id).await?;
    } else {
        state.cron.unschedule(id);
    }
    Ok(job)
}

pub async fn enable(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> AppResult<Json<CronJob>> {
    Ok(Json(set_enabled(&state, &id, true).await?))
}

pub async fn disable(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> AppResult<Json<CronJob>> {
    Ok(Json(set_enabled(&state, &id, false).await?))
}

#[derive(Serialize)]
pub struct SchedulerStatusResponse {
    active_executions: usize,
    total_jobs: usize,
}

pub async fn scheduler_status(State(state): State<Arc<GatewayState>>) -> Json<SchedulerStatusResponse> {
    Json(SchedulerStatusResponse {
        active_executions: state.cron.active_executions(),
        total_jobs: state.cron.jobs().await.len(),
    })
}
