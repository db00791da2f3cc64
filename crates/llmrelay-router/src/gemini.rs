//! Gemini dispatch (§4.10).
//!
//! Same shape as [`crate::amazonq`] — account from C6, fresh bearer via C7,
//! request via C2.2, response via C3 — but account selection and 429
//! handling are quota-aware: each account tracks a per-model
//! `remainingFraction` in `other.creditsInfo.models[model]`, refreshed from
//! upstream's `fetchAvailableModels` on a 429 rather than assumed exhausted
//! outright.

use std::sync::Arc;

use llmrelay_accounts::{Account, AccountKind, AccountStore, Distributor, RefreshOutcome, TokenManager, UsageStore};
use llmrelay_core::constants::MAX_ACCOUNT_SWITCHES;
use llmrelay_core::errors::ProxyError;
use llmrelay_core::events::Usage;
use llmrelay_core::ids::RequestId;
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::ProviderEventStream;
use llmrelay_providers_google::{build_gemini_request, handle_gemini_response, map_model_to_gemini};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::retry::{network_error_backoff, record_refresh_outcome, server_error_backoff, wait_before_retry_for};
use crate::usage::{UsageContext, track_usage};

/// A model is treated as rate-limited (not exhausted) above this remaining
/// fraction; at or below it, the model is marked exhausted until `resetTime`.
const RATE_LIMIT_FRACTION_THRESHOLD: f64 = 0.03;

/// Shared dependencies, identical shape to [`crate::amazonq::Deps`].
pub struct Deps {
    /// HTTP client used for upstream calls.
    pub http: reqwest::Client,
    /// Account store (C5).
    pub store: AccountStore,
    /// Selection distributor (C6).
    pub distributor: Arc<Distributor>,
    /// Token refresh manager (C7).
    pub token_manager: Arc<TokenManager>,
    /// Usage ledger (C9).
    pub usage: Arc<UsageStore>,
}

/// Dispatch one request over the gemini channel.
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
    let mapped_model = map_model_to_gemini(&req.model).to_string();
    let mut switches = 0u32;
    let mut excluded: Vec<String> = Vec::new();

    loop {
        let account = match forced_account_id {
            Some(id) => deps.store.get(id)?,
            None => select_with_quota(deps, &mapped_model, &excluded, now_ms)?,
        };

        match try_account(deps, &account, req, &mapped_model, cache, now_ms).await {
            Ok(stream) => return Ok(stream),
            Err(AccountAttemptError::SwitchAccount) if forced_account_id.is_none() && switches < MAX_ACCOUNT_SWITCHES => {
                switches += 1;
                excluded.push(account.id.clone());
                continue;
            }
            Err(AccountAttemptError::SwitchAccount) => {
                return Err(ProxyError::NoAccountAvailable { channel: "gemini".to_string() });
            }
            Err(AccountAttemptError::Proxy(err)) => return Err(err),
        }
    }
}

/// Select an enabled gemini account whose per-model credits allow `model`,
/// skipping anything in `excluded`. A past `resetTime` restores the model's
/// `remainingFraction` to 1.0 before the check.
fn select_with_quota(deps: &Deps, model: &str, excluded: &[String], now_ms: i64) -> Result<Account, ProxyError> {
    let candidates = deps.store.list_enabled(Some(AccountKind::Gemini))?;
    let now_iso = chrono::DateTime::from_timestamp_millis(now_ms).unwrap_or_else(chrono::Utc::now).to_rfc3339();

    let eligible: Vec<&Account> = candidates
        .iter()
        .filter(|acct| !excluded.contains(&acct.id))
        .filter(|acct| model_remaining_fraction(acct, model, &now_iso) > 0.0)
        .collect();

    let pool: Vec<&Account> = if eligible.is_empty() { candidates.iter().filter(|a| !excluded.contains(&a.id)).collect() } else { eligible };

    let picked = weighted_pick(&pool).cloned();
    let result = if picked.is_some() { "selected" } else { "exhausted" };
    metrics::counter!("account_selection_total", "kind" => "gemini", "result" => result).increment(1);

    picked.ok_or_else(|| ProxyError::NoAccountAvailable { channel: "gemini".to_string() }).map(|account| {
        deps.distributor.record_usage(&account.id, true, now_ms);
        account
    })
}

/// Pick one account at random, weighted by `Account.weight`.
fn weighted_pick<'a>(pool: &[&'a Account]) -> Option<&'a Account> {
    use rand::Rng;

    if pool.is_empty() {
        return None;
    }
    let total: i64 = pool.iter().map(|a| a.weight.max(1)).sum();
    let mut pick = rand::rng().random_range(0..total);
    for account in pool {
        let weight = account.weight.max(1);
        if pick < weight {
            return Some(account);
        }
        pick -= weight;
    }
    pool.last().copied()
}

/// Read `other.creditsInfo.models[model].remainingFraction`, treating a
/// missing entry as unrestricted (1.0) and a past `resetTime` as restored.
fn model_remaining_fraction(account: &Account, model: &str, now_iso: &str) -> f64 {
    let Some(entry) = account.other.get("creditsInfo").and_then(|c| c.get("models")).and_then(|m| m.get(model)) else {
        return 1.0;
    };
    let reset_time = entry.get("resetTime").and_then(|v| v.as_str());
    if let Some(reset_time) = reset_time {
        if reset_time < now_iso {
            return 1.0;
        }
    }
    entry.get("remainingFraction").and_then(serde_json::Value::as_f64).unwrap_or(1.0)
}

enum AccountAttemptError {
    SwitchAccount,
    Proxy(ProxyError),
}

impl From<llmrelay_accounts::AccountStoreError> for AccountAttemptError {
    fn from(err: llmrelay_accounts::AccountStoreError) -> Self {
        Self::Proxy(err.into())
    }
}

async fn try_account(
    deps: &Deps,
    account: &Account,
    req: &CanonicalClaudeRequest,
    mapped_model: &str,
    cache: llmrelay_providers::CacheAccounting,
    now_ms: i64,
) -> Result<ProviderEventStream, AccountAttemptError> {
    match deps.token_manager.ensure_fresh(account, now_ms).await {
        Ok(outcome) => {
            record_refresh_outcome("gemini", outcome);
            if matches!(outcome, RefreshOutcome::Failed | RefreshOutcome::InvalidGrant) {
                return Err(AccountAttemptError::SwitchAccount);
            }
        }
        Err(err) => return Err(err.into()),
    }

    let account = deps.store.get(&account.id)?;
    let bearer = account.access_token.clone().ok_or(AccountAttemptError::SwitchAccount)?;
    let mapped_model = account.map_model(mapped_model).into_owned();
    let api_endpoint = account
        .other
        .get("api_endpoint")
        .and_then(|v| v.as_str())
        .unwrap_or("https://cloudcode-pa.googleapis.com")
        .to_string();
    let project = account.other.get("project").and_then(|v| v.as_str()).map(str::to_owned);

    let coalesced = req.clone().with_coalesced_history();
    let payload = build_gemini_request(&coalesced, project.clone());
    let url = format!("{api_endpoint}/v1internal:streamGenerateContent?alt=sse");

    let server_backoff = server_error_backoff();
    let network_backoff = network_error_backoff();
    let mut server_attempt = 0u32;
    let mut network_attempt = 0u32;

    loop {
        let response = deps.http.post(&url).bearer_auth(&bearer).json(&payload).send().await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                if network_attempt >= network_backoff.max_retries {
                    return Err(AccountAttemptError::Proxy(ProxyError::UpstreamNetworkError { message: err.to_string() }));
                }
                network_attempt += 1;
                wait_before_retry_for("network_error", &network_backoff, network_attempt, None).await;
                continue;
            }
        };

        let status = response.status();

        if status.is_success() {
            let initial_usage = Usage {
                input_tokens: None,
                output_tokens: None,
                cache_creation_input_tokens: Some(u32::try_from(cache.creation).unwrap_or(u32::MAX)),
                cache_read_input_tokens: Some(u32::try_from(cache.read).unwrap_or(u32::MAX)),
            };
            let request_id = RequestId::new();
            let stream = handle_gemini_response(response, request_id.into_inner(), mapped_model.clone(), initial_usage);
            let ctx = UsageContext { account_id: account.id.clone(), channel: "gemini".to_string(), model: mapped_model };
            return Ok(track_usage(stream, Arc::clone(&deps.distributor), Arc::clone(&deps.usage), ctx, now_ms));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            warn!(account_id = %account.id, "gemini 401/403, forcing a token refresh");
            match deps.token_manager.ensure_fresh(&account, now_ms + 1).await {
                Ok(outcome) => {
                    record_refresh_outcome("gemini", outcome);
                    if matches!(outcome, RefreshOutcome::Failed | RefreshOutcome::InvalidGrant) {
                        return Err(AccountAttemptError::SwitchAccount);
                    }
                }
                Err(err) => return Err(err.into()),
            }
            if network_attempt >= network_backoff.max_retries {
                return Err(AccountAttemptError::Proxy(ProxyError::UpstreamNetworkError {
                    message: "gemini auth retries exhausted".to_string(),
                }));
            }
            network_attempt += 1;
            continue;
        }

        if status.as_u16() == 429 {
            let fraction = refresh_model_quota(deps, &account, &api_endpoint, &bearer, &mapped_model, project.as_deref(), now_ms).await;
            return match fraction {
                Ok(Some(reset_time)) => {
                    mark_model_exhausted(deps, &account.id, &mapped_model, &reset_time, now_ms);
                    deps.distributor.record_usage(&account.id, false, now_ms);
                    Err(AccountAttemptError::SwitchAccount)
                }
                Ok(None) => {
                    deps.distributor.set_cooldown(&account.id, Some(300), now_ms);
                    deps.distributor.record_usage(&account.id, false, now_ms);
                    Err(AccountAttemptError::SwitchAccount)
                }
                Err(()) => {
                    deps.distributor.set_cooldown(&account.id, Some(300), now_ms);
                    deps.distributor.record_usage(&account.id, false, now_ms);
                    Err(AccountAttemptError::Proxy(ProxyError::UpstreamRateLimited { retry_after_ms: 300_000 }))
                }
            };
        }

        if status.is_server_error() {
            if server_attempt >= server_backoff.max_retries {
                deps.distributor.record_usage(&account.id, false, now_ms);
                return Err(AccountAttemptError::Proxy(ProxyError::UpstreamServerError { status: status.as_u16() }));
            }
            server_attempt += 1;
            debug!(account_id = %account.id, status = %status, attempt = server_attempt, "gemini 5xx, backing off");
            wait_before_retry_for("server_error", &server_backoff, server_attempt, None).await;
            continue;
        }

        deps.distributor.record_usage(&account.id, false, now_ms);
        return Err(AccountAttemptError::Proxy(ProxyError::UpstreamServerError { status: status.as_u16() }));
    }
}

#[derive(Deserialize)]
struct AvailableModel {
    name: String,
    #[serde(rename = "remainingFraction")]
    remaining_fraction: f64,
    #[serde(rename = "resetTime")]
    reset_time: Option<String>,
}

#[derive(Deserialize)]
struct FetchAvailableModelsResponse {
    #[serde(default)]
    models: Vec<AvailableModel>,
}

/// Call `fetchAvailableModels` to refresh per-model quota after a 429.
///
/// Returns `Ok(Some(reset_time))` if the model should be marked exhausted,
/// `Ok(None)` if it's a transient rate limit, or `Err(())` if the quota
/// endpoint itself could not be reached (treated as a plain rate limit).
async fn refresh_model_quota(
    deps: &Deps,
    account: &Account,
    api_endpoint: &str,
    bearer: &str,
    model: &str,
    project: Option<&str>,
    _now_ms: i64,
) -> Result<Option<String>, ()> {
    let mut url = format!("{api_endpoint}/v1internal:fetchAvailableModels");
    if let Some(project) = project {
        url = format!("{url}?project={project}");
    }

    let response = deps.http.post(&url).bearer_auth(bearer).send().await.map_err(|_| ())?;
    if !response.status().is_success() {
        return Err(());
    }
    let body: FetchAvailableModelsResponse = response.json().await.map_err(|_| ())?;

    let Some(entry) = body.models.iter().find(|m| m.name == model) else {
        warn!(account_id = %account.id, model, "fetchAvailableModels did not return this model");
        return Ok(None);
    };

    if entry.remaining_fraction > RATE_LIMIT_FRACTION_THRESHOLD {
        Ok(None)
    } else {
        Ok(Some(entry.reset_time.clone().unwrap_or_default()))
    }
}

fn mark_model_exhausted(deps: &Deps, account_id: &str, model: &str, reset_time_iso: &str, now_ms: i64) {
    let now_iso = chrono::DateTime::from_timestamp_millis(now_ms).unwrap_or_else(chrono::Utc::now).to_rfc3339();
    if let Err(err) = deps.store.mark_model_exhausted(account_id, model, reset_time_iso, &now_iso) {
        warn!(account_id, error = %err, "failed to mark model exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_returns_no_account_available_when_pool_is_empty() {
        let store = AccountStore::open_in_memory().unwrap();
        let deps = Deps {
            http: reqwest::Client::new(),
            store: store.clone(),
            distributor: Arc::new(Distributor::new(store.clone())),
            token_manager: Arc::new(TokenManager::new(store.clone())),
            usage: Arc::new(UsageStore::new(store).unwrap()),
        };
        let req = CanonicalClaudeRequest {
            model: "gemini-2.0-flash".into(),
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
    fn model_remaining_fraction_defaults_to_unrestricted() {
        let account = Account {
            id: "acct_1".into(),
            label: "t".into(),
            kind: AccountKind::Gemini,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
            other: serde_json::json!({}),
            last_refresh_time: None,
            last_refresh_status: None,
            enabled: true,
            weight: 50,
            rate_limit_per_hour: 20,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(model_remaining_fraction(&account, "gemini-2.0-flash", "2026-01-01T00:00:00Z"), 1.0);
    }

    #[test]
    fn model_remaining_fraction_restores_after_reset_time() {
        let mut account_other = serde_json::json!({
            "creditsInfo": {"models": {"gemini-2.0-flash": {"remainingFraction": 0.0, "resetTime": "2026-01-01T00:00:00Z"}}}
        });
        let account = Account {
            id: "acct_1".into(),
            label: "t".into(),
            kind: AccountKind::Gemini,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
            other: account_other.take(),
            last_refresh_time: None,
            last_refresh_status: None,
            enabled: true,
            weight: 50,
            rate_limit_per_hour: 20,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(model_remaining_fraction(&account, "gemini-2.0-flash", "2026-02-01T00:00:00Z"), 1.0);
        assert_eq!(model_remaining_fraction(&account, "gemini-2.0-flash", "2025-12-01T00:00:00Z"), 0.0);
    }
}
