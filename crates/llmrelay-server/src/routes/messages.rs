//! `POST /v1/messages` and its two channel-pinned siblings (§6, §4.8).
//!
//! Success renders the provider's event stream as Anthropic SSE; a failure
//! that occurs before any byte has been sent renders as an Anthropic-shaped
//! JSON error body; a failure mid-stream closes out the SSE sequence with an
//! `error` event followed by `message_stop` (§7).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, extract};
use futures::StreamExt;
use llmrelay_core::errors::ProxyError;
use llmrelay_core::events::{ProviderStreamEvent, StreamErrorPayload};
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::ProviderError;
use llmrelay_router::{ChannelPin, RequestOverrides, route_messages};
use serde_json::json;

use crate::server::AppState;

/// Rejects `/v1/*` requests missing or mismatching `x-api-key`, when
/// `AppConfig::api_key` is set. A no-op when no key is configured.
pub async fn require_api_key(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if let Some(expected) = &state.api_key {
        let presented = request.headers().get("x-api-key").and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return proxy_error_response(&ProxyError::Auth { message: "missing or invalid x-api-key".into() });
        }
    }
    next.run(request).await
}

fn pin_label(pin: ChannelPin) -> &'static str {
    match pin {
        ChannelPin::Auto => "auto",
        ChannelPin::Gemini => "gemini",
        ChannelPin::CustomApi => "custom_api",
    }
}

fn overrides_from_headers(headers: &HeaderMap) -> RequestOverrides {
    RequestOverrides {
        forced_account_id: headers.get("x-account-id").and_then(|v| v.to_str().ok()).map(str::to_string),
        test_mode: headers.get("x-test-mode").and_then(|v| v.to_str().ok()) == Some("true"),
    }
}

pub fn proxy_error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "type": "error",
        "error": { "type": err.wire_type(), "message": err.to_string() },
    });
    (status, Json(body)).into_response()
}

async fn handle(
    state: AppState,
    headers: HeaderMap,
    pin: ChannelPin,
    req: CanonicalClaudeRequest,
) -> Response {
    let overrides = overrides_from_headers(&headers);
    let now_ms = chrono::Utc::now().timestamp_millis();
    let channel_label = pin_label(pin);

    let stream = match route_messages(&state.router, &req, pin, overrides, now_ms).await {
        Ok(stream) => stream,
        Err(err) => {
            metrics::counter!("http_requests_total", "route" => channel_label, "outcome" => "error").increment(1);
            return proxy_error_response(&err);
        }
    };
    metrics::counter!("http_requests_total", "route" => channel_label, "outcome" => "ok").increment(1);

    let sse = stream.map(|item| -> Result<axum::response::sse::Event, std::convert::Infallible> {
        let event = match item {
            Ok(event) => event,
            Err(err) => terminal_error_event(&err),
        };
        Ok(render_sse_event(&event))
    });

    let mut response = axum::response::Sse::new(sse).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

/// Turn a mid-stream provider failure into the canonical internal `error`
/// event so the SSE sequence still closes out cleanly (§7).
fn terminal_error_event(err: &ProviderError) -> ProviderStreamEvent {
    let message = err.to_string();
    ProviderStreamEvent::Error { error: StreamErrorPayload { kind: "api_error".to_string(), message } }
}

fn render_sse_event(event: &ProviderStreamEvent) -> axum::response::sse::Event {
    let value = serde_json::to_value(event).unwrap_or(json!({}));
    let event_name = value.get("type").and_then(|v| v.as_str()).unwrap_or("message").to_string();
    let data = serde_json::to_string(&value).unwrap_or_default();
    axum::response::sse::Event::default().event(event_name).data(data)
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    extract::Json(req): extract::Json<CanonicalClaudeRequest>,
) -> Response {
    handle(state, headers, ChannelPin::Auto, req).await
}

pub async fn gemini_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    extract::Json(req): extract::Json<CanonicalClaudeRequest>,
) -> Response {
    handle(state, headers, ChannelPin::Gemini, req).await
}

pub async fn custom_api_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    extract::Json(req): extract::Json<CanonicalClaudeRequest>,
) -> Response {
    handle(state, headers, ChannelPin::CustomApi, req).await
}
