//! Amazon Q / CodeWhisperer dispatch (§4.8 steps 4–9).
//!
//! The default channel. Acquires an account from C6, ensures a fresh bearer
//! via C7, builds the CodeWhisperer payload via C2.1, and drives the
//! response through C3. 401/403/429/5xx/network failures are handled per
//! account switch and backoff rules; up to [`MAX_ACCOUNT_SWITCHES`] accounts
//! are tried before giving up.

use std::sync::Arc;

use llmrelay_accounts::{Account, AccountKind, AccountPatch, AccountStore, Distributor, TokenManager, RefreshOutcome, UsageStore};
use llmrelay_core::constants::MAX_ACCOUNT_SWITCHES;
use llmrelay_core::errors::ProxyError;
use llmrelay_core::events::Usage;
use llmrelay_core::ids::RequestId;
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::ProviderEventStream;
use llmrelay_providers_anthropic::{build_codewhisperer_request, handle_codewhisperer_response, map_model_to_codewhisperer};
use tracing::{debug, warn};

use crate::retry::{network_error_backoff, record_refresh_outcome, server_error_backoff, wait_before_retry_for};
use crate::usage::{UsageContext, track_usage};

const CODEWHISPERER_URL: &str = "https://q.us-east-1.amazonaws.com/";
const USER_AGENT: &str = "aws-sdk-rust/1.0 os/linux lang/rust/1.85 api/codewhisperer-streaming";

/// Shared dependencies every channel dispatcher needs.
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

/// Dispatch one request over the amazonq channel, selecting an account per
/// call and switching to another on `invalid_grant`/suspension, up to
/// [`MAX_ACCOUNT_SWITCHES`] attempts.
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
    let mut switches = 0u32;

    loop {
        let account = match forced_account_id {
            Some(id) => deps.store.get(id)?,
            None => match deps.distributor.select(AccountKind::Amazonq, now_ms) {
                Ok(account) => {
                    metrics::counter!("account_selection_total", "kind" => "amazonq", "result" => "selected").increment(1);
                    account
                }
                Err(err) => {
                    metrics::counter!("account_selection_total", "kind" => "amazonq", "result" => "exhausted").increment(1);
                    return Err(err.into());
                }
            },
        };

        match try_account(deps, &account, req, cache, now_ms).await {
            Ok(stream) => return Ok(stream),
            Err(AccountAttemptError::SwitchAccount) if forced_account_id.is_none() && switches < MAX_ACCOUNT_SWITCHES => {
                switches += 1;
                deps.distributor.set_cooldown(&account.id, Some(0), now_ms);
                continue;
            }
            Err(AccountAttemptError::SwitchAccount) => {
                return Err(ProxyError::AccountSuspended { account_id: account.id });
            }
            Err(AccountAttemptError::Proxy(err)) => return Err(err),
        }
    }
}

enum AccountAttemptError {
    /// This account is unusable; pick another and retry from the top.
    SwitchAccount,
    /// A terminal error that should surface directly to the client.
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
    cache: llmrelay_providers::CacheAccounting,
    now_ms: i64,
) -> Result<ProviderEventStream, AccountAttemptError> {
    match deps.token_manager.ensure_fresh(account, now_ms).await {
        Ok(outcome) => {
            record_refresh_outcome("amazonq", outcome);
            if matches!(outcome, RefreshOutcome::Failed | RefreshOutcome::InvalidGrant) {
                return Err(AccountAttemptError::SwitchAccount);
            }
        }
        Err(err) => return Err(err.into()),
    }

    let account = deps.store.get(&account.id)?;
    let bearer = account.access_token.clone().ok_or(AccountAttemptError::SwitchAccount)?;

    let mapped_model = map_model_to_codewhisperer(&req.model);
    let mapped_model = account.map_model(mapped_model).into_owned();

    let profile_arn = account.other.get("profileArn").and_then(|v| v.as_str()).map(str::to_owned);

    let coalesced = req.clone().with_coalesced_history();
    let payload = build_codewhisperer_request(&coalesced, profile_arn);

    let server_backoff = server_error_backoff();
    let network_backoff = network_error_backoff();
    let mut server_attempt = 0u32;
    let mut network_attempt = 0u32;
    let mut amz_sdk_attempt = 1u32;

    loop {
        let response = deps
            .http
            .post(CODEWHISPERER_URL)
            .header("Content-Type", "application/x-amz-json-1.0")
            .header("X-Amz-Target", "AmazonCodeWhispererStreamingService.GenerateAssistantResponse")
            .header("Authorization", format!("Bearer {bearer}"))
            .header("User-Agent", USER_AGENT)
            .header("Amz-Sdk-Request", format!("attempt={amz_sdk_attempt}; max=4"))
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                if network_attempt >= network_backoff.max_retries {
                    return Err(AccountAttemptError::Proxy(ProxyError::UpstreamNetworkError { message: err.to_string() }));
                }
                network_attempt += 1;
                amz_sdk_attempt += 1;
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
            let stream = handle_codewhisperer_response(response, request_id.into_inner(), mapped_model.clone(), initial_usage);
            let ctx = UsageContext { account_id: account.id.clone(), channel: "amazonq".to_string(), model: mapped_model };
            return Ok(track_usage(stream, Arc::clone(&deps.distributor), Arc::clone(&deps.usage), ctx, now_ms));
        }

        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            if body.contains("TEMPORARILY_SUSPENDED") {
                disable_account(deps, &account.id, "TEMPORARILY_SUSPENDED", now_ms);
                return Err(AccountAttemptError::SwitchAccount);
            }
            warn!(account_id = %account.id, "codewhisperer 401/403, forcing a token refresh");
            match deps.token_manager.ensure_fresh(&account, now_ms + 1).await {
                Ok(outcome) => {
                    record_refresh_outcome("amazonq", outcome);
                    if matches!(outcome, RefreshOutcome::Failed | RefreshOutcome::InvalidGrant) {
                        return Err(AccountAttemptError::SwitchAccount);
                    }
                }
                Err(err) => return Err(err.into()),
            }
            if network_attempt >= network_backoff.max_retries {
                return Err(AccountAttemptError::Proxy(ProxyError::UpstreamNetworkError {
                    message: "codewhisperer auth retries exhausted".to_string(),
                }));
            }
            network_attempt += 1;
            amz_sdk_attempt += 1;
            continue;
        }

        if status.as_u16() == 429 {
            if body.contains("ServiceQuotaExceededException") && body.contains("MONTHLY_REQUEST_COUNT") {
                disable_account(deps, &account.id, "MONTHLY_REQUEST_COUNT", now_ms);
                deps.distributor.record_usage(&account.id, false, now_ms);
                return Err(AccountAttemptError::Proxy(ProxyError::UpstreamRateLimited { retry_after_ms: 0 }));
            }
            deps.distributor.set_cooldown(&account.id, Some(300), now_ms);
            deps.distributor.record_usage(&account.id, false, now_ms);
            return Err(AccountAttemptError::Proxy(ProxyError::UpstreamRateLimited { retry_after_ms: 300_000 }));
        }

        if status.is_server_error() {
            if server_attempt >= server_backoff.max_retries {
                deps.distributor.record_usage(&account.id, false, now_ms);
                return Err(AccountAttemptError::Proxy(ProxyError::UpstreamServerError { status: status.as_u16() }));
            }
            server_attempt += 1;
            amz_sdk_attempt += 1;
            debug!(account_id = %account.id, status = %status, attempt = server_attempt, "codewhisperer 5xx, backing off");
            wait_before_retry_for("server_error", &server_backoff, server_attempt, None).await;
            continue;
        }

        deps.distributor.record_usage(&account.id, false, now_ms);
        return Err(AccountAttemptError::Proxy(ProxyError::UpstreamServerError { status: status.as_u16() }));
    }
}

fn disable_account(deps: &Deps, account_id: &str, reason: &str, now_ms: i64) {
    let now_iso = chrono::DateTime::from_timestamp_millis(now_ms).unwrap_or_else(chrono::Utc::now).to_rfc3339();
    if let Ok(account) = deps.store.get(account_id) {
        let mut other = account.other;
        if let Some(obj) = other.as_object_mut() {
            let _ = obj.insert("suspended".to_string(), serde_json::Value::Bool(true));
            let _ = obj.insert("suspend_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
        let patch = AccountPatch { other: Some(other), enabled: Some(false), ..Default::default() };
        if let Err(err) = deps.store.update(account_id, &patch, &now_iso) {
            warn!(account_id, error = %err, "failed to disable account");
        }
    }
}
