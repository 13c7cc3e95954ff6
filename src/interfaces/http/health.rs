//! Health check handler

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::notification::NotificationKind;
use crate::interfaces::ws::SharedHub;

/// Health check state
#[derive(Clone)]
pub struct HealthState {
    pub hub: SharedHub,
    pub started_at: Arc<Instant>,
}

/// Service health response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Connected subscribers across all tenants
    pub subscribers: usize,
    /// Tenants with at least one subscriber
    pub tenants: usize,
    pub pending_list_changes: usize,
    pub pending_single_changes: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        subscribers: state.hub.subscriber_count(),
        tenants: state.hub.tenant_count(),
        pending_list_changes: state.hub.pending(NotificationKind::List),
        pending_single_changes: state.hub.pending(NotificationKind::Single),
    })
}
