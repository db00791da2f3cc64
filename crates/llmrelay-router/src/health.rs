//! `GET /health` — a liveness probe reporting the account pool's shape.

use serde::Serialize;

use llmrelay_accounts::{AccountStore, AccountStoreError};

/// `GET /health` response body.
#[derive(Clone, Debug, Serialize)]
pub struct HealthStatus {
    /// `"healthy"` while at least one account is eligible for selection,
    /// else `"unhealthy"` — the proxy is up but can serve nothing.
    pub status: &'static str,
    /// Accounts currently eligible for selection.
    pub enabled_accounts: usize,
    /// Total accounts on file, enabled or not.
    pub total_accounts: usize,
}

/// Build the health-check body from the account store.
pub fn check(store: &AccountStore) -> Result<HealthStatus, AccountStoreError> {
    let total = store.list_all()?.len();
    let enabled = store.list_enabled(None)?.len();
    let status = if enabled > 0 { "healthy" } else { "unhealthy" };
    Ok(HealthStatus { status, enabled_accounts: enabled, total_accounts: total })
}
