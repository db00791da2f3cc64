//! Account data model.

use serde::{Deserialize, Serialize};

/// Which upstream backend an account authenticates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Amazon Q / CodeWhisperer, bearer-token streaming RPC.
    Amazonq,
    /// Google Gemini internal streaming RPC, OAuth2.
    Gemini,
    /// Arbitrary OpenAI- or Anthropic-compatible HTTP endpoint, static API key.
    CustomApi,
}

impl AccountKind {
    /// Parse from the schema's lowercase string form.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "amazonq" => Some(Self::Amazonq),
            "gemini" => Some(Self::Gemini),
            "custom_api" => Some(Self::CustomApi),
            _ => None,
        }
    }

    /// Render as the schema's lowercase string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amazonq => "amazonq",
            Self::Gemini => "gemini",
            Self::CustomApi => "custom_api",
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single `requestModel` → `targetModel` override.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelMapping {
    /// Model name as requested by the client.
    pub request_model: String,
    /// Model name to substitute when talking to upstream.
    pub target_model: String,
}

/// A credential record for one upstream account.
///
/// `weight` is an integer 1-100; a disabled account is never selected by the
/// distributor; `kind` never changes after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    /// Opaque id, e.g. `acct_<uuid v7>`.
    pub id: String,
    /// Human label shown in the admin surface.
    pub label: String,
    /// Upstream backend kind. Immutable after creation.
    pub kind: AccountKind,
    /// OAuth client id (amazonq/gemini) or unused (`custom_api`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth client secret (amazonq/gemini) or the static API key (`custom_api`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// OAuth refresh token. Absent for `custom_api`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Current bearer/access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Free-form metadata bag. Reserved keys: `project`, `api_endpoint`,
    /// `api_base`, `model`, `format`, `modelMappings`, `creditsInfo`,
    /// `suspended`, `suspend_reason`, `token_expires_at`.
    pub other: serde_json::Value,
    /// ISO 8601 timestamp of the last refresh attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_time: Option<String>,
    /// `"success"`, `"failed_<code>"`, or `"failed_invalid_grant"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_status: Option<String>,
    /// Whether this account may currently be selected.
    pub enabled: bool,
    /// Selection weight, 1-100. Default 50.
    pub weight: i64,
    /// Requests-per-hour ceiling enforced via `call_logs`. Default 20.
    pub rate_limit_per_hour: i64,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 timestamp of the last mutation.
    pub updated_at: String,
}

impl Account {
    /// `other.suspended == true`.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.other
            .get("suspended")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Per-account model-mapping list (`other.modelMappings`).
    #[must_use]
    pub fn model_mappings(&self) -> Vec<ModelMapping> {
        self.other
            .get("modelMappings")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Apply this account's model-mapping list to a requested model name.
    #[must_use]
    pub fn map_model<'a>(&self, requested: &'a str) -> std::borrow::Cow<'a, str> {
        for mapping in self.model_mappings() {
            if mapping.request_model == requested {
                return std::borrow::Cow::Owned(mapping.target_model);
            }
        }
        std::borrow::Cow::Borrowed(requested)
    }
}

/// In-memory per-account usage counters, owned exclusively by the
/// distributor. Lazily created on first selection; never destroyed.
#[derive(Clone, Debug, Default)]
pub struct AccountUsageRecord {
    /// Successful completions.
    pub success_count: u64,
    /// Failed completions.
    pub fail_count: u64,
    /// Unix millis of the last selection.
    pub last_used_timestamp_ms: i64,
    /// Short-window (60s) usage counter, for `balance_score`.
    pub recent_usage_count: u32,
    /// Start of the current 60s window, unix millis.
    pub window_start_ms: i64,
}

impl AccountUsageRecord {
    /// Total calls recorded (success + fail).
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.success_count + self.fail_count
    }

    /// Fraction of calls that succeeded; `1.0` with zero calls (benefit of
    /// the doubt — callers should gate this on `total_calls() == 0`
    /// separately where that distinction matters).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Record an outcome at `now_ms`, rolling the 60s window if needed.
    pub fn record(&mut self, success: bool, now_ms: i64) {
        self.touch(now_ms);
        if success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
    }

    /// Bump `last_used_timestamp_ms`/`recent_usage_count` without recording
    /// a success/fail outcome. Used at selection time, before the caller
    /// knows how the call will turn out.
    pub fn touch(&mut self, now_ms: i64) {
        if now_ms.saturating_sub(self.window_start_ms) >= 60_000 {
            self.window_start_ms = now_ms;
            self.recent_usage_count = 0;
        }
        self.recent_usage_count += 1;
        self.last_used_timestamp_ms = now_ms;
    }
}

/// Hourly/daily/total call accounting for one account, as reported by
/// `call_stats`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    /// Calls in the last hour.
    pub hour: i64,
    /// Calls in the last 24 hours.
    pub day: i64,
    /// Calls recorded ever (subject to pruning beyond the 24h window).
    pub total: i64,
    /// `rate_limit_per_hour` for this account.
    pub limit: i64,
    /// `max(0, limit - hour)`.
    pub remaining: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
