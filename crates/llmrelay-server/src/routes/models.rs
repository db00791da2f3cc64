//! `GET /v1/models` (§6).

use axum::Json;
use axum::extract::State;

use crate::server::AppState;

pub async fn list_models(State(state): State<AppState>) -> Json<llmrelay_router::models::ModelList> {
    let config = state.router.config.read().expect("config lock poisoned");
    Json(llmrelay_router::models::list_models(&config))
}
