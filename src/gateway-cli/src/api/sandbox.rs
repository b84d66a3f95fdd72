//! `sandbox.*` RPC methods: per-user sandbox lifecycle management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use gateway_sandbox::SandboxStatus;
use serde::Serialize;

use crate::error::AppResult;
use crate::state::GatewayState;

pub async fn status(State(state): State<Arc<GatewayState>>, Path(user_id): Path<String>) -> Json<SandboxStatus> {
    Json(state.sandbox.status(&user_id).await)
}

pub async fn create(
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<String>,
) -> AppResult<Json<SandboxStatus>> {
    state.sandbox.get_or_create(&user_id).await?;
    Ok(Json(state.sandbox.status(&user_id).await))
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn kill(State(state): State<Arc<GatewayState>>, Path(user_id): Path<String>) -> Json<SuccessResponse> {
    state.sandbox.terminate(&user_id).await;
    Json(SuccessResponse { success: true })
}

pub async fn hibernate(State(state): State<Arc<GatewayState>>, Path(user_id): Path<String>) -> Json<SuccessResponse> {
    state.sandbox.hibernate(&user_id).await;
    Json(SuccessResponse { success: true })
}
