//! Account selection distributor (C6).
//!
//! Owns the in-memory usage-record and cooldown maps exclusively — the
//! account store owns rows, the distributor owns scoring state. Guarded by
//! a single mutex per process, matching the teacher's session-state
//! locking granularity.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use crate::errors::AccountStoreError;
use crate::store::AccountStore;
use crate::types::{Account, AccountKind, AccountUsageRecord};

const COOLDOWN_SECONDS_DEFAULT: i64 = 300;
const MIN_SUCCESS_RATE_THRESHOLD: f64 = 0.5;
const MIN_CALLS_FOR_THRESHOLD: u64 = 10;

struct DistributorState {
    usage: HashMap<String, AccountUsageRecord>,
    cooldowns: HashMap<String, i64>,
}

/// Weighted-random account selector with in-memory success/cooldown state.
pub struct Distributor {
    store: AccountStore,
    state: Mutex<DistributorState>,
}

impl Distributor {
    /// Build a distributor over `store`, with empty usage/cooldown maps.
    #[must_use]
    pub fn new(store: AccountStore) -> Self {
        Self {
            store,
            state: Mutex::new(DistributorState {
                usage: HashMap::new(),
                cooldowns: HashMap::new(),
            }),
        }
    }

    /// Select one enabled account of `kind`, or fail with
    /// [`AccountStoreError::NoAccountAvailable`].
    pub fn select(&self, kind: AccountKind, now_ms: i64) -> Result<Account, AccountStoreError> {
        let candidates = self.store.list_enabled(Some(kind))?;
        if candidates.is_empty() {
            return Err(AccountStoreError::NoAccountAvailable(kind.to_string()));
        }

        let now_iso = chrono::DateTime::from_timestamp_millis(now_ms)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let eligible: Vec<&Account> = candidates
            .iter()
            .filter(|acct| {
                !Self::is_in_cooldown(&state.cooldowns, &acct.id, now_ms)
                    && self.store.check_rate_limit(&acct.id, &now_iso).unwrap_or(true)
            })
            .collect();
        let pool: Vec<&Account> = if eligible.is_empty() { candidates.iter().collect() } else { eligible };

        let scored: Vec<(&Account, f64)> = pool
            .iter()
            .map(|acct| {
                let record = state.usage.entry(acct.id.clone()).or_default();
                (*acct, Self::score(acct, record, now_ms))
            })
            .collect();

        let total_calls_by_threshold: Vec<(&Account, f64)> = scored
            .iter()
            .filter(|(acct, _)| {
                let record = state.usage.get(&acct.id).cloned().unwrap_or_default();
                record.total_calls() < MIN_CALLS_FOR_THRESHOLD
                    || record.success_rate() >= MIN_SUCCESS_RATE_THRESHOLD
            })
            .copied()
            .collect();
        let scored = if total_calls_by_threshold.is_empty() { scored } else { total_calls_by_threshold };

        let chosen = Self::weighted_pick(&scored).ok_or_else(|| AccountStoreError::NoAccountAvailable(kind.to_string()))?;

        state.usage.entry(chosen.id.clone()).or_default().touch(now_ms);

        Ok(chosen.clone())
    }

    /// Record the outcome of a call against `account_id`.
    pub fn record_usage(&self, account_id: &str, success: bool, now_ms: i64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.usage.entry(account_id.to_owned()).or_default().record(success, now_ms);
    }

    /// Put `account_id` into cooldown for `seconds` (default 300).
    pub fn set_cooldown(&self, account_id: &str, seconds: Option<i64>, now_ms: i64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let until = now_ms / 1000 + seconds.unwrap_or(COOLDOWN_SECONDS_DEFAULT);
        let _ = state.cooldowns.insert(account_id.to_owned(), until);
    }

    /// Whether `account_id` is currently cooling down.
    #[must_use]
    pub fn is_in_cooldown(&self, account_id: &str, now_ms: i64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::is_in_cooldown_locked(&mut state.cooldowns, account_id, now_ms)
    }

    fn is_in_cooldown_locked(cooldowns: &mut HashMap<String, i64>, account_id: &str, now_ms: i64) -> bool {
        let now_s = now_ms / 1000;
        match cooldowns.get(account_id) {
            Some(&until) if until > now_s => true,
            Some(_) => {
                let _ = cooldowns.remove(account_id);
                false
            }
            None => false,
        }
    }

    fn is_in_cooldown(cooldowns: &HashMap<String, i64>, account_id: &str, now_ms: i64) -> bool {
        let now_s = now_ms / 1000;
        matches!(cooldowns.get(account_id), Some(&until) if until > now_s)
    }

    fn score(account: &Account, record: &AccountUsageRecord, now_ms: i64) -> f64 {
        let total = record.total_calls();
        let success_score = if total < MIN_CALLS_FOR_THRESHOLD {
            40.0
        } else if record.success_rate() < 0.5 {
            record.success_rate() * 20.0
        } else {
            record.success_rate() * 40.0
        };

        let seconds_since_used = if record.last_used_timestamp_ms == 0 {
            i64::MAX
        } else {
            (now_ms - record.last_used_timestamp_ms) / 1000
        };
        let cooldown_score = if seconds_since_used >= 300 {
            30.0
        } else if seconds_since_used >= 60 {
            25.0
        } else if seconds_since_used >= 30 {
            15.0
        } else {
            5.0
        };

        let balance_score = (30.0 - f64::from(record.recent_usage_count) * 10.0).max(0.0);

        (success_score + cooldown_score + balance_score) * (account.weight as f64 / 50.0)
    }

    fn weighted_pick<'a>(scored: &[(&'a Account, f64)]) -> Option<&'a Account> {
        if scored.is_empty() {
            return None;
        }
        let min_score = scored.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
        let shift = if min_score <= 0.0 { 1.0 - min_score } else { 0.0 };
        let weights: Vec<f64> = scored.iter().map(|(_, s)| s + shift).collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return scored.first().map(|(acct, _)| *acct);
        }

        let mut pick = rand::rng().random_range(0.0..total);
        for (idx, weight) in weights.iter().enumerate() {
            if pick < *weight {
                return Some(scored[idx].0);
            }
            pick -= weight;
        }
        scored.last().map(|(acct, _)| *acct)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
