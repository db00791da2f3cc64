//! Minimal `/v2/*` admin guard.
//!
//! The original login/session/2FA subsystem (bcrypt passwords, device-bound
//! sessions) is out of scope (§1) — it is an external collaborator specified
//! only at its interface. What remains in scope is the boundary itself: a
//! shared-secret token compared against `X-Session-Token`, configured once
//! at startup. If no token is configured, the admin surface is open (local/
//! dev use), matching how `api_key` on `/v1/*` is optional.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use llmrelay_core::errors::ProxyError;

use crate::routes::messages::proxy_error_response;
use crate::server::AppState;

pub async fn require_session_token(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if let Some(expected) = &state.admin_token {
        let presented = request.headers().get("x-session-token").and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return proxy_error_response(&ProxyError::Auth { message: "missing or invalid X-Session-Token".into() });
        }
    }
    next.run(request).await
}
