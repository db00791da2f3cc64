//! `/v2/accounts*` — CRUD, refresh, test, stats, quota (§6, §4.5-§4.7).

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use llmrelay_accounts::{Account, AccountPatch};
use llmrelay_core::errors::ProxyError;
use serde_json::json;

use crate::routes::messages::proxy_error_response;
use crate::server::AppState;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub async fn list(State(state): State<AppState>) -> Response {
    match state.router.store.list_all() {
        Ok(accounts) => Json(accounts).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.router.store.get(&id) {
        Ok(account) => Json(account).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

pub async fn create(State(state): State<AppState>, Json(account): Json<Account>) -> Response {
    match state.router.store.create(&account) {
        Ok(()) => (axum::http::StatusCode::CREATED, Json(account)).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

pub async fn update(State(state): State<AppState>, Path(id): Path<String>, Json(patch): Json<AccountPatch>) -> Response {
    if let Err(err) = state.router.store.update(&id, &patch, &now_iso()) {
        return proxy_error_response(&ProxyError::from(err));
    }
    match state.router.store.get(&id) {
        Ok(account) => Json(account).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.router.store.delete(&id) {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

/// `POST /v2/accounts/{id}/refresh`. `TokenManager` only performs an actual
/// exchange when the bearer is within the refresh skew window — this calls
/// it unconditionally and reports whatever outcome results, rather than
/// adding a forced-refresh code path the rest of the system has no other use
/// for.
pub async fn refresh(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let now_ms = Utc::now().timestamp_millis();
    let account = match state.router.store.get(&id) {
        Ok(account) => account,
        Err(err) => return proxy_error_response(&ProxyError::from(err)),
    };
    match state.router.token_manager.ensure_fresh(&account, now_ms).await {
        Ok(outcome) => Json(json!({ "outcome": format!("{outcome:?}") })).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

/// `POST /v2/accounts/refresh-all` — refreshes every enabled amazonq
/// account sequentially (§4.7); per-account failures are logged inside
/// `TokenManager` rather than surfaced, so this always answers 202.
pub async fn refresh_all(State(state): State<AppState>) -> Response {
    let now_ms = Utc::now().timestamp_millis();
    state.router.token_manager.refresh_all_amazonq(now_ms).await;
    axum::http::StatusCode::ACCEPTED.into_response()
}

/// `POST /v2/accounts/{id}/test` — verify the account can still obtain a
/// fresh bearer (or, for `custom_api`, that it exists), without issuing an
/// actual chat request.
pub async fn test(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let now_ms = Utc::now().timestamp_millis();
    let account = match state.router.store.get(&id) {
        Ok(account) => account,
        Err(err) => return proxy_error_response(&ProxyError::from(err)),
    };
    match state.router.token_manager.ensure_fresh(&account, now_ms).await {
        Ok(outcome) => {
            let ok = !matches!(outcome, llmrelay_accounts::RefreshOutcome::Failed | llmrelay_accounts::RefreshOutcome::InvalidGrant);
            Json(json!({ "ok": ok, "outcome": format!("{outcome:?}") })).into_response()
        }
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

pub async fn stats(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.router.store.call_stats(&id, &now_iso()) {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}

/// `GET /v2/accounts/{id}/quota` — the `creditsInfo` bag from `other_json`,
/// read directly rather than re-deriving it (only the gemini dispatch path
/// mutates it, via `mark_model_exhausted`).
pub async fn quota(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.router.store.get(&id) {
        Ok(account) => {
            let credits = account.other.get("creditsInfo").cloned().unwrap_or_else(|| json!({}));
            Json(credits).into_response()
        }
        Err(err) => proxy_error_response(&ProxyError::from(err)),
    }
}
