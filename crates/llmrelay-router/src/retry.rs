//! Backoff wait helper shared by the per-channel dispatch modules.
//!
//! `llmrelay-core::retry` holds the portable, sync-only math (backoff
//! formula, `Retry-After` parsing); this module is where the actual async
//! sleeping happens, since only this crate links `tokio`.

use llmrelay_accounts::RefreshOutcome;
use llmrelay_core::retry::{RetryConfig, calculate_backoff_delay_with_random};

/// Record `auth_refresh_total{provider,status}` for a completed refresh attempt.
pub fn record_refresh_outcome(provider: &'static str, outcome: RefreshOutcome) {
    let status = match outcome {
        RefreshOutcome::Success => "success",
        RefreshOutcome::NotApplicable => "not_applicable",
        RefreshOutcome::AlreadyFresh => "already_fresh",
        RefreshOutcome::Failed => "failed",
        RefreshOutcome::InvalidGrant => "invalid_grant",
    };
    metrics::counter!("auth_refresh_total", "provider" => provider, "status" => status).increment(1);
}

/// Exponential-backoff config for a 5xx retry loop: 1s, 2s, 4s + jitter,
/// up to 3 attempts.
pub fn server_error_backoff() -> RetryConfig {
    RetryConfig { max_retries: 3, base_delay_ms: 1000, max_delay_ms: 8000, jitter_factor: 0.2 }
}

/// Fixed 1s-spaced retry, up to 3 attempts, for transport-level failures.
pub fn network_error_backoff() -> RetryConfig {
    RetryConfig { max_retries: 3, base_delay_ms: 1000, max_delay_ms: 1000, jitter_factor: 0.0 }
}

/// Sleep for the backoff delay of `attempt` (1-indexed) under `config`,
/// honoring `retry_after_ms` (e.g. a parsed `Retry-After` header) by taking
/// the larger of the two. Records `provider_retries_total{category}`.
pub async fn wait_before_retry_for(category: &'static str, config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) {
    metrics::counter!("provider_retries_total", "category" => category).increment(1);
    wait_before_retry(config, attempt, retry_after_ms).await;
}

/// Sleep for the backoff delay of `attempt` (1-indexed) under `config`,
/// honoring `retry_after_ms` (e.g. a parsed `Retry-After` header) by taking
/// the larger of the two.
pub async fn wait_before_retry(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) {
    let backoff_ms =
        calculate_backoff_delay_with_random(attempt, config.base_delay_ms, config.max_delay_ms, config.jitter_factor, rand::random::<f64>());
    let delay_ms = retry_after_ms.map_or(backoff_ms, |ra| backoff_ms.max(ra));
    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
}
