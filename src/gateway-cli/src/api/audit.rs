//! `audit.*` RPC methods: paginated log queries and rollup stats.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use gateway_audit::{AuditEntry, QueryFilter, Stats};
use gateway_core::model::{Action, Tier};
use serde::{Deserialize, Serialize};

use crate::state::GatewayState;

#[derive(Deserialize, Default)]
pub struct LogsRequest {
    user_id: Option<String>,
    tier: Option<Tier>,
    action: Option<Action>,
    from: Option<chrono::DateTime<chrono::Utc>>,
    to: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
pub struct LogsResponse {
    entries: Vec<AuditEntry>,
    total: usize,
    /// Beyond the bare `{entries, total}` the RPC table specifies: lets a
    /// dashboard know whether to keep paging without re-deriving it from
    /// `offset + entries.len() < total` itself.
    has_more: bool,
}

pub async fn logs(State(state): State<Arc<GatewayState>>, Json(req): Json<LogsRequest>) -> Json<LogsResponse> {
    let mut filter = QueryFilter::new();
    filter.tier = req.tier;
    filter.action = req.action;
    filter.from = req.from;
    filter.to = req.to;
    if let Some(limit) = req.limit {
        filter.limit = limit;
    }
    if let Some(offset) = req.offset {
        filter.offset = offset;
    }

    let page = state.audit.query_page(req.user_id.as_deref(), filter);
    Json(LogsResponse {
        entries: page.entries,
        total: page.total,
        has_more: page.has_more,
    })
}

#[derive(Deserialize, Default)]
pub struct StatsRequest {
    user_id: Option<String>,
    #[serde(default = "default_days")]
    days: i64,
}

fn default_days() -> i64 {
    30
}

pub async fn stats(State(state): State<Arc<GatewayState>>, Json(req): Json<StatsRequest>) -> Json<Stats> {
    Json(state.audit.stats(req.user_id.as_deref(), req.days))
}
