//! `GET /health` (§6).

use axum::Json;
use axum::extract::State;
use llmrelay_router::health::HealthStatus;

use crate::server::AppState;

/// `GET /health` — `{status, enabled_accounts, total_accounts}`.
pub async fn handler(State(state): State<AppState>) -> Json<HealthStatus> {
    let status = llmrelay_router::health::check(&state.router.store).unwrap_or(HealthStatus {
        status: "unhealthy",
        enabled_accounts: 0,
        total_accounts: 0,
    });
    Json(status)
}
