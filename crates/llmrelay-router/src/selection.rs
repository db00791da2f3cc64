//! Channel selection: step 2 of the router's `POST /v1/messages` handling.
//!
//! A request either pins its channel explicitly (the `/v1/gemini/messages`
//! and `/v1/custom_api/messages` endpoints, or an `X-Account-ID` header) or
//! falls back to a model-name lookup against the config store's allow-lists.

use llmrelay_accounts::AccountKind;
use llmrelay_config::AppConfig;

/// The provider channel a request will be dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Amazon Q / CodeWhisperer — the default channel.
    Amazonq,
    /// Google Gemini.
    Gemini,
    /// Arbitrary OpenAI- or Anthropic-compatible custom API.
    CustomApi,
}

impl Channel {
    /// Wire name used in logging, usage rows, and the `/v1/{channel}/messages` paths.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amazonq => "amazonq",
            Self::Gemini => "gemini",
            Self::CustomApi => "custom_api",
        }
    }

    /// The account kind backing this channel.
    #[must_use]
    pub fn account_kind(self) -> AccountKind {
        match self {
            Self::Amazonq => AccountKind::Amazonq,
            Self::Gemini => AccountKind::Gemini,
            Self::CustomApi => AccountKind::CustomApi,
        }
    }
}

/// Choose a channel for `model`, consulting the config store's allow-lists.
/// `gemini_only_models` is checked before `amazonq_only_models`; anything not
/// named in either list (including an empty `supported_models`, which means
/// "no restriction") defaults to amazonq.
#[must_use]
pub fn select_channel_by_model(model: &str, config: &AppConfig) -> Channel {
    if config.gemini_only_models.iter().any(|m| m == model) {
        Channel::Gemini
    } else if config.amazonq_only_models.iter().any(|m| m == model) {
        Channel::Amazonq
    } else {
        Channel::Amazonq
    }
}

/// Reject a model not present in `supported_models`, unless the list is
/// empty (meaning no restriction is configured).
#[must_use]
pub fn is_model_supported(model: &str, config: &AppConfig) -> bool {
    config.supported_models.is_empty() || config.supported_models.iter().any(|m| m == model)
}
