//! # llmrelay-router
//!
//! Account selection, per-channel dispatch, retry/backoff, and usage
//! recording (component C8) — the entry point `POST /v1/messages` and its
//! two channel-pinned siblings (`/v1/gemini/messages`, `/v1/custom_api/messages`)
//! are routed through.
//!
//! - [`selection`] — model -> channel routing against the config store's allow-lists
//! - [`amazonq`] — Amazon Q / CodeWhisperer dispatch
//! - [`gemini`] — Gemini dispatch, with quota-aware account selection
//! - [`custom_api`] — OpenAI- or Claude-compatible custom endpoint dispatch
//! - [`usage`] — wraps a channel's stream to record one usage row on completion
//! - [`retry`] — async backoff wait, layered over `llmrelay-core`'s portable math
//! - [`models`] — `GET /v1/models`
//! - [`health`] — `GET /health`

#![deny(unsafe_code)]

pub mod amazonq;
pub mod custom_api;
pub mod gemini;
pub mod health;
pub mod models;
pub mod retry;
pub mod selection;
pub mod usage;

use std::sync::{Arc, RwLock};

use llmrelay_accounts::{AccountStore, Distributor, TokenManager, UsageStore};
use llmrelay_config::AppConfig;
use llmrelay_core::errors::ProxyError;
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::ProviderEventStream;
use llmrelay_providers::{CacheAccounting, PromptCacheSimulator, extract_cacheable_text};

pub use selection::Channel;

/// Every dependency one `POST /v1/messages` call needs, built once at
/// startup and shared (via `Arc`, by the HTTP layer) across every request.
pub struct RouterState {
    /// HTTP client reused across every upstream call.
    pub http: reqwest::Client,
    /// Account store (C5).
    pub store: AccountStore,
    /// Selection distributor (C6).
    pub distributor: Arc<Distributor>,
    /// Token refresh manager (C7), amazonq/gemini only.
    pub token_manager: Arc<TokenManager>,
    /// Usage ledger (C9).
    pub usage: Arc<UsageStore>,
    /// Prompt-cache simulator (C4).
    pub cache: Arc<PromptCacheSimulator>,
    /// Live configuration (allow-lists, model mapping). Held behind a
    /// `RwLock` rather than a plain `Arc` because `/v2/config` can PATCH the
    /// whitelisted keys at runtime (§6).
    pub config: Arc<RwLock<AppConfig>>,
}

impl RouterState {
    fn amazonq_deps(&self) -> amazonq::Deps {
        amazonq::Deps {
            http: self.http.clone(),
            store: self.store.clone(),
            distributor: Arc::clone(&self.distributor),
            token_manager: Arc::clone(&self.token_manager),
            usage: Arc::clone(&self.usage),
        }
    }

    fn gemini_deps(&self) -> gemini::Deps {
        gemini::Deps {
            http: self.http.clone(),
            store: self.store.clone(),
            distributor: Arc::clone(&self.distributor),
            token_manager: Arc::clone(&self.token_manager),
            usage: Arc::clone(&self.usage),
        }
    }

    fn custom_api_deps(&self) -> custom_api::Deps {
        custom_api::Deps {
            http: self.http.clone(),
            store: self.store.clone(),
            distributor: Arc::clone(&self.distributor),
            usage: Arc::clone(&self.usage),
        }
    }
}

/// How the caller pinned (or didn't pin) this request's channel.
#[derive(Clone, Copy, Debug, Default)]
pub enum ChannelPin {
    /// `/v1/messages` — route by model against the config allow-lists.
    #[default]
    Auto,
    /// `/v1/gemini/messages` — always the gemini channel.
    Gemini,
    /// `/v1/custom_api/messages` — always the custom_api channel.
    CustomApi,
}

/// Per-request overrides carried from HTTP headers.
#[derive(Clone, Debug, Default)]
pub struct RequestOverrides {
    /// `X-Account-ID` — force this account id regardless of weighting.
    pub forced_account_id: Option<String>,
    /// `X-Test-Mode: true` — alongside `forced_account_id`, allow a disabled account.
    pub test_mode: bool,
}

/// Route one canonical request per §4.8 steps 1-3: validate the model,
/// resolve the channel (pinned endpoint, forced account, or model lookup),
/// run the prompt-cache simulator, and dispatch to the chosen channel.
#[tracing::instrument(skip_all, fields(model = %req.model))]
pub async fn route_messages(
    state: &RouterState,
    req: &CanonicalClaudeRequest,
    pin: ChannelPin,
    overrides: RequestOverrides,
    now_ms: i64,
) -> Result<ProviderEventStream, ProxyError> {
    let config = state.config.read().expect("config lock poisoned").clone();

    if !selection::is_model_supported(&req.model, &config) {
        return Err(ProxyError::Validation { message: format!("unsupported model: {}", req.model) });
    }

    let forced_account = match &overrides.forced_account_id {
        Some(id) => {
            let account = state.store.get(id)?;
            if !account.enabled && !overrides.test_mode {
                return Err(ProxyError::Validation { message: format!("account {id} is disabled") });
            }
            Some(account)
        }
        None => None,
    };

    let channel = match pin {
        ChannelPin::Gemini => Channel::Gemini,
        ChannelPin::CustomApi => Channel::CustomApi,
        ChannelPin::Auto => match &forced_account {
            Some(account) => channel_for_kind(account.kind),
            None => selection::select_channel_by_model(&req.model, &config),
        },
    };

    let cacheable_text = extract_cacheable_text(req);
    let cache = state.cache.record_access(cacheable_text.as_deref(), now_ms);

    let forced_id = forced_account.as_ref().map(|a| a.id.as_str());

    dispatch(state, channel, req, cache, now_ms, forced_id).await
}

fn channel_for_kind(kind: llmrelay_accounts::AccountKind) -> Channel {
    match kind {
        llmrelay_accounts::AccountKind::Amazonq => Channel::Amazonq,
        llmrelay_accounts::AccountKind::Gemini => Channel::Gemini,
        llmrelay_accounts::AccountKind::CustomApi => Channel::CustomApi,
    }
}

async fn dispatch(
    state: &RouterState,
    channel: Channel,
    req: &CanonicalClaudeRequest,
    cache: CacheAccounting,
    now_ms: i64,
    forced_account_id: Option<&str>,
) -> Result<ProviderEventStream, ProxyError> {
    match channel {
        Channel::Amazonq => amazonq::dispatch_forced(&state.amazonq_deps(), req, cache, now_ms, forced_account_id).await,
        Channel::Gemini => gemini::dispatch_forced(&state.gemini_deps(), req, cache, now_ms, forced_account_id).await,
        Channel::CustomApi => custom_api::dispatch_forced(&state.custom_api_deps(), req, cache, now_ms, forced_account_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmrelay_providers::cache::CacheConfig;

    fn state() -> RouterState {
        let store = AccountStore::open_in_memory().unwrap();
        RouterState {
            http: reqwest::Client::new(),
            store: store.clone(),
            distributor: Arc::new(Distributor::new(store.clone())),
            token_manager: Arc::new(TokenManager::new(store.clone())),
            usage: Arc::new(UsageStore::new(store).unwrap()),
            cache: Arc::new(PromptCacheSimulator::new(CacheConfig::default())),
            config: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    fn req(model: &str) -> CanonicalClaudeRequest {
        CanonicalClaudeRequest {
            model: model.to_string(),
            max_tokens: 100,
            temperature: None,
            system: None,
            messages: vec![],
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: true,
        }
    }

    #[tokio::test]
    async fn rejects_unsupported_model() {
        let state = state();
        *state.config.write().unwrap() = AppConfig { supported_models: vec!["allowed".into()], ..AppConfig::default() };
        let result = route_messages(&state, &req("not-allowed"), ChannelPin::Auto, RequestOverrides::default(), 0).await;
        assert!(matches!(result, Err(ProxyError::Validation { .. })));
    }

    #[tokio::test]
    async fn forced_account_id_not_found_surfaces_persistence_error() {
        let state = state();
        let overrides = RequestOverrides { forced_account_id: Some("acct_missing".to_string()), test_mode: false };
        let result = route_messages(&state, &req("claude-3-5-sonnet"), ChannelPin::Auto, overrides, 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_pool_surfaces_no_account_available() {
        let state = state();
        let result = route_messages(&state, &req("claude-3-5-sonnet"), ChannelPin::Auto, RequestOverrides::default(), 0).await;
        assert!(matches!(result, Err(ProxyError::NoAccountAvailable { .. })));
    }
}
