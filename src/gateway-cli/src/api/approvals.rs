//! `approvals.*` RPC methods: the dashboard's view into pending human
//! approvals, plus the approve/reject decision endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use gateway_approval::ApprovalRequestInfo;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::GatewayState;

#[derive(Serialize)]
pub struct PendingResponse {
    requests: Vec<ApprovalRequestInfo>,
    count: usize,
}

pub async fn pending(State(state): State<Arc<GatewayState>>) -> Json<PendingResponse> {
    let requests = state.approval.list_pending();
    Json(PendingResponse {
        count: requests.len(),
        requests,
    })
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    approved_by: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

pub async fn approve(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.approval.approve(&id, req.approved_by)?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    reason: Option<String>,
}

pub async fn reject(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.approval.reject(&id, req.reason)?;
    Ok(Json(SuccessResponse { success: true }))
}
