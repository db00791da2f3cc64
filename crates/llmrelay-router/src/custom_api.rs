//! Custom-API dispatch (§4.11).
//!
//! `other.format` on the selected account picks between an
//! OpenAI-compatible `/chat/completions` endpoint and a Claude-compatible
//! `/v1/messages` endpoint. Unlike [`crate::amazonq`]/[`crate::gemini`],
//! `client_secret` is a static API key — there is no token refresh, so a
//! failed attempt never triggers an account switch, only a retry or a
//! terminal error surfaced as an SSE `error` event.

use std::sync::Arc;

use llmrelay_accounts::{Account, AccountKind, AccountStore, Distributor, UsageStore};
use llmrelay_core::errors::ProxyError;
use llmrelay_core::events::{ProviderStreamEvent, Usage};
use llmrelay_core::ids::RequestId;
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::{ProviderError, ProviderEventStream};
use llmrelay_providers_openai::{build_claude_passthrough_request, build_openai_chat_request, handle_claude_passthrough_response, handle_openai_response};
use tracing::debug;

use crate::retry::{network_error_backoff, server_error_backoff, wait_before_retry_for};
use crate::usage::{UsageContext, track_usage};

/// Shared dependencies. No [`llmrelay_accounts::TokenManager`] — custom-api
/// accounts authenticate with a static `client_secret`.
pub struct Deps {
    /// HTTP client used for upstream calls.
    pub http: reqwest::Client,
    /// Account store (C5).
    pub store: AccountStore,
    /// Selection distributor (C6).
    pub distributor: Arc<Distributor>,
    /// Usage ledger (C9).
    pub usage: Arc<UsageStore>,
}

/// Dispatch one request over the custom_api channel.
pub async fn dispatch(deps: &Deps, req: &CanonicalClaudeRequest, cache: llmrelay_providers::CacheAccounting, now_ms: i64) -> Result<ProviderEventStream, ProxyError> {
    dispatch_forced(deps, req, cache, now_ms, None).await
}

/// Dispatch, optionally pinned to `forced_account_id` (the `X-Account-ID` path).
pub async fn dispatch_forced(
    deps: &Deps,
    req: &CanonicalClaudeRequest,
    cache: llmrelay_providers::CacheAccounting,
    now_ms: i64,
    forced_account_id: Option<&str>,
) -> Result<ProviderEventStream, ProxyError> {
    let account = match forced_account_id {
        Some(id) => deps.store.get(id)?,
        None => match deps.distributor.select(AccountKind::CustomApi, now_ms) {
            Ok(account) => {
                metrics::counter!("account_selection_total", "kind" => "custom_api", "result" => "selected").increment(1);
                account
            }
            Err(err) => {
                metrics::counter!("account_selection_total", "kind" => "custom_api", "result" => "exhausted").increment(1);
                return Err(err.into());
            }
        },
    };

    let format = account.other.get("format").and_then(|v| v.as_str()).unwrap_or("openai").to_string();
    let api_base = account.other.get("api_base").and_then(|v| v.as_str()).unwrap_or_default().trim_end_matches('/').to_string();
    let configured_model = account.other.get("model").and_then(|v| v.as_str()).map(str::to_owned);
    let api_key = account.client_secret.clone().unwrap_or_default();

    let coalesced = req.clone().with_coalesced_history();
    let mapped_model = account.map_model(configured_model.as_deref().unwrap_or(&req.model)).into_owned();

    match format.as_str() {
        "claude" => dispatch_claude(deps, &account, &api_base, &api_key, &coalesced, &mapped_model, cache, now_ms).await,
        _ => dispatch_openai(deps, &account, &api_base, &api_key, &coalesced, &mapped_model, cache, now_ms).await,
    }
}

async fn dispatch_openai(
    deps: &Deps,
    account: &Account,
    api_base: &str,
    api_key: &str,
    req: &CanonicalClaudeRequest,
    model: &str,
    cache: llmrelay_providers::CacheAccounting,
    now_ms: i64,
) -> Result<ProviderEventStream, ProxyError> {
    let url = format!("{}/chat/completions", with_v1(api_base));
    let payload = build_openai_chat_request(req, model);
    let thinking_enabled = req.thinking_enabled();

    let response = send_with_retry(deps, account, || {
        deps.http.post(&url).bearer_auth(api_key).json(&payload)
    }, now_ms)
    .await?;

    let response = match response {
        Ok(r) => r,
        Err(stream) => return Ok(stream),
    };

    let initial_usage = initial_usage(&cache);
    let request_id = RequestId::new();
    let stream = handle_openai_response(response, request_id.into_inner(), model.to_string(), initial_usage, thinking_enabled);
    let ctx = UsageContext { account_id: account.id.clone(), channel: "custom_api".to_string(), model: model.to_string() };
    Ok(track_usage(stream, Arc::clone(&deps.distributor), Arc::clone(&deps.usage), ctx, now_ms))
}

async fn dispatch_claude(
    deps: &Deps,
    account: &Account,
    api_base: &str,
    api_key: &str,
    req: &CanonicalClaudeRequest,
    model: &str,
    cache: llmrelay_providers::CacheAccounting,
    now_ms: i64,
) -> Result<ProviderEventStream, ProxyError> {
    let url = format!("{api_base}/v1/messages");
    let mut payload = build_claude_passthrough_request(req);
    if let Some(obj) = payload.as_object_mut() {
        let _ = obj.insert("model".to_string(), serde_json::Value::String(model.to_string()));
    }

    let response = send_with_retry(deps, account, || {
        deps.http
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
    }, now_ms)
    .await?;

    let response = match response {
        Ok(r) => r,
        Err(stream) => return Ok(stream),
    };

    let stream = handle_claude_passthrough_response(response);
    let _ = cache;
    let ctx = UsageContext { account_id: account.id.clone(), channel: "custom_api".to_string(), model: model.to_string() };
    Ok(track_usage(stream, Arc::clone(&deps.distributor), Arc::clone(&deps.usage), ctx, now_ms))
}

fn initial_usage(cache: &llmrelay_providers::CacheAccounting) -> Usage {
    Usage {
        input_tokens: None,
        output_tokens: None,
        cache_creation_input_tokens: Some(u32::try_from(cache.creation).unwrap_or(u32::MAX)),
        cache_read_input_tokens: Some(u32::try_from(cache.read).unwrap_or(u32::MAX)),
    }
}

/// Append `/v1` to `api_base` unless it already ends with it.
fn with_v1(api_base: &str) -> String {
    if api_base.ends_with("/v1") { api_base.to_string() } else { format!("{api_base}/v1") }
}

/// Run the 5xx-backoff / network-retry loop shared by both custom-api
/// formats. On success, returns `Ok(Ok(response))`; on a terminal failure
/// that must surface as an SSE `error` event rather than a hard error,
/// returns `Ok(Err(stream))`.
async fn send_with_retry<F>(
    deps: &Deps,
    account: &Account,
    build: F,
    now_ms: i64,
) -> Result<Result<reqwest::Response, ProviderEventStream>, ProxyError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let server_backoff = server_error_backoff();
    let network_backoff = network_error_backoff();
    let mut server_attempt = 0u32;
    let mut network_attempt = 0u32;

    loop {
        let response = build().send().await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                if network_attempt >= network_backoff.max_retries {
                    deps.distributor.record_usage(&account.id, false, now_ms);
                    return Ok(Err(error_stream(&err.to_string())));
                }
                network_attempt += 1;
                wait_before_retry_for("network_error", &network_backoff, network_attempt, None).await;
                continue;
            }
        };

        let status = response.status();

        if status.is_success() {
            return Ok(Ok(response));
        }

        if status.is_server_error() {
            if server_attempt >= server_backoff.max_retries {
                deps.distributor.record_usage(&account.id, false, now_ms);
                return Ok(Err(error_stream(&format!("upstream server error (status {status})"))));
            }
            server_attempt += 1;
            debug!(account_id = %account.id, status = %status, attempt = server_attempt, "custom api 5xx, backing off");
            wait_before_retry_for("server_error", &server_backoff, server_attempt, None).await;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        deps.distributor.record_usage(&account.id, false, now_ms);
        return Ok(Err(error_stream(&format!("upstream returned {status}: {body}"))));
    }
}

/// Build a one-shot SSE stream carrying a single Anthropic `error` event,
/// per the no-retry-left / non-2xx / connection-failure case.
fn error_stream(message: &str) -> ProviderEventStream {
    let event: Result<ProviderStreamEvent, ProviderError> =
        Err(ProviderError::Api { status: 502, message: message.to_string(), code: None, retryable: false });
    Box::pin(futures::stream::iter(vec![event]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn dispatch_returns_no_account_available_when_pool_is_empty() {
        let store = AccountStore::open_in_memory().unwrap();
        let deps = Deps {
            http: reqwest::Client::new(),
            store: store.clone(),
            distributor: Arc::new(Distributor::new(store.clone())),
            usage: Arc::new(UsageStore::new(store).unwrap()),
        };
        let req = CanonicalClaudeRequest {
            model: "gpt-4o".into(),
            max_tokens: 100,
            temperature: None,
            system: None,
            messages: vec![],
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: true,
        };
        let result = dispatch(&deps, &req, llmrelay_providers::CacheAccounting::default(), 0).await;
        assert!(matches!(result, Err(ProxyError::NoAccountAvailable { .. })));
    }

    #[test]
    fn with_v1_appends_when_missing() {
        assert_eq!(with_v1("https://api.example.com"), "https://api.example.com/v1");
        assert_eq!(with_v1("https://api.example.com/v1"), "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn error_stream_yields_one_err_event() {
        let mut stream = error_stream("boom");
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(_))));
        assert!(stream.next().await.is_none());
    }
}
