//! Per-kind bearer token refresh (C7).
//!
//! Owns in-memory bearer-expiry state exclusively; the account store owns
//! the persisted token rows. Refreshes are serialized per account via a
//! keyed mutex so concurrent requests share one in-flight refresh.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::AccountStoreError;
use crate::store::AccountStore;
use crate::types::{Account, AccountKind};

const AMAZONQ_TOKEN_URL: &str = "https://oidc.us-east-1.amazonaws.com/token";
const GEMINI_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REFRESH_SKEW: Duration = Duration::from_secs(300);
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Result of a refresh attempt, for logging/metrics at the call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Token refreshed and persisted.
    Success,
    /// Account does not use bearer refresh (`custom_api`).
    NotApplicable,
    /// Existing bearer is still fresh; nothing to do.
    AlreadyFresh,
    /// Refresh failed with an HTTP or network error.
    Failed,
    /// Refresh failed with `invalid_grant`; account has been suspended.
    InvalidGrant,
}

#[derive(Deserialize)]
struct AmazonqTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(rename = "expiresIn")]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct GeminiTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Per-account-id keyed refresh mutex, backed by the account store.
pub struct TokenManager {
    store: AccountStore,
    http: reqwest::Client,
    locks: Mutex<HashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    /// Build a manager over `store` using a fresh `reqwest` client.
    #[must_use]
    pub fn new(store: AccountStore) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure `account` has a bearer that is not within 5 minutes of
    /// expiring, refreshing it under a per-account lock if needed.
    pub async fn ensure_fresh(&self, account: &Account, now_ms: i64) -> Result<RefreshOutcome, AccountStoreError> {
        if account.kind == AccountKind::CustomApi {
            return Ok(RefreshOutcome::NotApplicable);
        }
        if !Self::needs_refresh(account, now_ms) {
            return Ok(RefreshOutcome::AlreadyFresh);
        }

        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            locks
                .entry(account.id.clone())
                .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: a concurrent request may have
        // already refreshed while we waited.
        let current = self.store.get(&account.id)?;
        if !Self::needs_refresh(&current, now_ms) {
            return Ok(RefreshOutcome::AlreadyFresh);
        }

        match current.kind {
            AccountKind::Amazonq => self.refresh_amazonq(&current, now_ms).await,
            AccountKind::Gemini => self.refresh_gemini(&current, now_ms).await,
            AccountKind::CustomApi => Ok(RefreshOutcome::NotApplicable),
        }
    }

    fn needs_refresh(account: &Account, now_ms: i64) -> bool {
        let Some(token) = &account.access_token else {
            return true;
        };
        if token.is_empty() {
            return true;
        }
        match account.kind {
            AccountKind::Amazonq => Self::jwt_expires_within(token, now_ms, REFRESH_SKEW).unwrap_or(true),
            AccountKind::Gemini => {
                let Some(expires_at) = account.other.get("token_expires_at").and_then(serde_json::Value::as_i64) else {
                    return true;
                };
                expires_at - now_ms < REFRESH_SKEW.as_millis() as i64
            }
            AccountKind::CustomApi => false,
        }
    }

    /// Decode (without signature verification — we don't hold the issuer's
    /// key) the `exp` claim of a JWT and compare against `now_ms + skew`.
    fn jwt_expires_within(token: &str, now_ms: i64, skew: Duration) -> Option<bool> {
        let payload_b64 = token.split('.').nth(1)?;
        let payload = base64_url_decode(payload_b64)?;
        let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
        let exp_secs = claims.get("exp")?.as_i64()?;
        Some(exp_secs * 1000 - now_ms < skew.as_millis() as i64)
    }

    async fn refresh_amazonq(&self, account: &Account, now_ms: i64) -> Result<RefreshOutcome, AccountStoreError> {
        let Some(refresh_token) = &account.refresh_token else {
            return Ok(RefreshOutcome::Failed);
        };
        let now_iso = iso_from_millis(now_ms);

        let response = self
            .http
            .post(AMAZONQ_TOKEN_URL)
            .json(&serde_json::json!({
                "clientId": account.client_id,
                "clientSecret": account.client_secret,
                "grantType": "refresh_token",
                "refreshToken": refresh_token,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(_) => {
                self.store.update_tokens(&account.id, account.access_token.as_deref().unwrap_or(""), None, "failed_network", &now_iso)?;
                return Ok(RefreshOutcome::Failed);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 400 && body.contains("invalid_grant") {
            self.suspend(&account.id, "INVALID_GRANT", &now_iso)?;
            self.store.update_tokens(&account.id, account.access_token.as_deref().unwrap_or(""), None, "failed_invalid_grant", &now_iso)?;
            return Ok(RefreshOutcome::InvalidGrant);
        }

        if !status.is_success() {
            self.store.update_tokens(
                &account.id,
                account.access_token.as_deref().unwrap_or(""),
                None,
                &format!("failed_{}", status.as_u16()),
                &now_iso,
            )?;
            return Ok(RefreshOutcome::Failed);
        }

        let Ok(parsed) = serde_json::from_str::<AmazonqTokenResponse>(&body) else {
            self.store.update_tokens(&account.id, account.access_token.as_deref().unwrap_or(""), None, "failed_parse", &now_iso)?;
            return Ok(RefreshOutcome::Failed);
        };

        self.store.update_tokens(&account.id, &parsed.access_token, parsed.refresh_token.as_deref(), "success", &now_iso)?;
        let _ = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(RefreshOutcome::Success)
    }

    async fn refresh_gemini(&self, account: &Account, now_ms: i64) -> Result<RefreshOutcome, AccountStoreError> {
        let Some(refresh_token) = &account.refresh_token else {
            return Ok(RefreshOutcome::Failed);
        };
        let now_iso = iso_from_millis(now_ms);

        let params = [
            ("client_id", account.client_id.as_deref().unwrap_or_default()),
            ("client_secret", account.client_secret.as_deref().unwrap_or_default()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self.http.post(GEMINI_TOKEN_URL).form(&params).send().await;
        let response = match response {
            Ok(r) => r,
            Err(_) => {
                self.store.update_tokens(&account.id, account.access_token.as_deref().unwrap_or(""), None, "failed_network", &now_iso)?;
                return Ok(RefreshOutcome::Failed);
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.store.update_tokens(
                &account.id,
                account.access_token.as_deref().unwrap_or(""),
                None,
                &format!("failed_{}", status.as_u16()),
                &now_iso,
            )?;
            return Ok(RefreshOutcome::Failed);
        }

        let Ok(parsed) = response.json::<GeminiTokenResponse>().await else {
            self.store.update_tokens(&account.id, account.access_token.as_deref().unwrap_or(""), None, "failed_parse", &now_iso)?;
            return Ok(RefreshOutcome::Failed);
        };

        self.store.update_tokens(&account.id, &parsed.access_token, parsed.refresh_token.as_deref(), "success", &now_iso)?;

        let expires_at_ms = now_ms + parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS) * 1000;
        let mut account = self.store.get(&account.id)?;
        if let Some(obj) = account.other.as_object_mut() {
            let _ = obj.insert("token_expires_at".to_owned(), serde_json::json!(expires_at_ms));
        }
        self.store.update(
            &account.id,
            &crate::store::AccountPatch { other: Some(account.other.clone()), ..Default::default() },
            &now_iso,
        )?;

        Ok(RefreshOutcome::Success)
    }

    fn suspend(&self, account_id: &str, reason: &str, now_iso: &str) -> Result<(), AccountStoreError> {
        let account = self.store.get(account_id)?;
        let mut other = account.other;
        if let Some(obj) = other.as_object_mut() {
            let _ = obj.insert("suspended".to_owned(), serde_json::json!(true));
            let _ = obj.insert("suspend_reason".to_owned(), serde_json::json!(reason));
        }
        self.store.update(
            account_id,
            &crate::store::AccountPatch { other: Some(other), enabled: Some(false), ..Default::default() },
            now_iso,
        )
    }

    /// Sequentially refresh every enabled amazonq account, 1s apart.
    /// Failures are logged and do not stop the loop.
    pub async fn refresh_all_amazonq(&self, now_ms: i64) {
        let accounts = match self.store.list_enabled(Some(AccountKind::Amazonq)) {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list amazonq accounts for background refresh");
                return;
            }
        };
        for account in accounts {
            match self.ensure_fresh(&account, now_ms).await {
                Ok(outcome) => tracing::debug!(account_id = %account.id, ?outcome, "background token refresh"),
                Err(err) => tracing::warn!(account_id = %account.id, error = %err, "background token refresh failed"),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

fn iso_from_millis(now_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(now_ms).map(|dt| dt.to_rfc3339()).unwrap_or_default()
}

fn base64_url_decode(input: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(kind: AccountKind) -> Account {
        Account {
            id: "acct_1".to_owned(),
            label: "test".to_owned(),
            kind,
            client_id: Some("client".to_owned()),
            client_secret: Some("secret".to_owned()),
            refresh_token: Some("refresh".to_owned()),
            access_token: None,
            other: serde_json::json!({}),
            last_refresh_time: None,
            last_refresh_status: None,
            enabled: true,
            weight: 50,
            rate_limit_per_hour: 20,
            created_at: "2026-01-01T00:00:00Z".to_owned(),
            updated_at: "2026-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn custom_api_never_needs_refresh() {
        let account = sample_account(AccountKind::CustomApi);
        assert!(!TokenManager::needs_refresh(&account, 0));
    }

    #[test]
    fn missing_token_needs_refresh() {
        let account = sample_account(AccountKind::Gemini);
        assert!(TokenManager::needs_refresh(&account, 0));
    }

    #[test]
    fn gemini_respects_token_expires_at() {
        let mut account = sample_account(AccountKind::Gemini);
        account.access_token = Some("bearer".to_owned());
        account.other = serde_json::json!({"token_expires_at": 1_000_000_i64});

        assert!(TokenManager::needs_refresh(&account, 999_999_000));
        assert!(!TokenManager::needs_refresh(&account, 1));
    }

    #[test]
    fn amazonq_reads_jwt_exp_claim() {
        let exp = 2_000;
        let payload = serde_json::json!({"exp": exp});
        let payload_b64 = {
            use base64::Engine;
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string())
        };
        let token = format!("header.{payload_b64}.sig");

        let mut account = sample_account(AccountKind::Amazonq);
        account.access_token = Some(token);

        assert!(TokenManager::needs_refresh(&account, 1_900_000));
        assert!(!TokenManager::needs_refresh(&account, 100));
    }

    #[tokio::test]
    async fn ensure_fresh_is_no_op_for_custom_api() {
        let store = AccountStore::open_in_memory().unwrap();
        let account = sample_account(AccountKind::CustomApi);
        store.create(&account).unwrap();

        let manager = TokenManager::new(store);
        let outcome = manager.ensure_fresh(&account, 0).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::NotApplicable);
    }
}
