//! Usage tracker (C9) — one row per completed stream, with grouped
//! summaries for the admin surface.

use rusqlite::params;

use crate::errors::AccountStoreError;
use crate::store::AccountStore;

/// Grouping dimension for [`UsageStore::summarize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageGroupBy {
    /// One row per model.
    Model,
    /// One row per account id.
    Account,
    /// A single all-up row.
    All,
}

/// Time window for [`UsageStore::summarize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageWindow {
    /// Last hour.
    Hour,
    /// Last 24 hours.
    Day,
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
    /// Unbounded.
    All,
}

impl UsageWindow {
    fn hours(self) -> Option<i64> {
        match self {
            Self::Hour => Some(1),
            Self::Day => Some(24),
            Self::Week => Some(24 * 7),
            Self::Month => Some(24 * 30),
            Self::All => None,
        }
    }
}

/// One grouped usage total.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageSummary {
    /// The group key (model name, account id, or `"all"`).
    pub key: String,
    /// Number of requests in this group.
    pub request_count: i64,
    /// Sum of `input_tokens`.
    pub input_tokens: i64,
    /// Sum of `output_tokens`.
    pub output_tokens: i64,
    /// Sum of `cache_creation_input_tokens`.
    pub cache_creation_input_tokens: i64,
    /// Sum of `cache_read_input_tokens`.
    pub cache_read_input_tokens: i64,
    /// `input_tokens + output_tokens`.
    pub total_tokens: i64,
}

/// Append-only store for per-completion usage rows (`usage` table), backed
/// by the same connection pool as [`AccountStore`].
#[derive(Clone)]
pub struct UsageStore {
    store: AccountStore,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS usage (
    request_id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cache_creation_input_tokens INTEGER NOT NULL DEFAULT 0,
    cache_read_input_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage(timestamp);
";

impl UsageStore {
    /// Wrap `store`'s pool, creating the `usage` table if absent.
    pub fn new(store: AccountStore) -> Result<Self, AccountStoreError> {
        store.with_connection(|conn| conn.execute_batch(SCHEMA))?;
        Ok(Self { store })
    }

    /// Append one row for a completed stream.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        request_id: &str,
        account_id: &str,
        channel: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cache_creation_input_tokens: i64,
        cache_read_input_tokens: i64,
        now_iso: &str,
    ) -> Result<(), AccountStoreError> {
        let total_tokens = input_tokens + output_tokens;
        self.store.with_connection(|conn| {
            conn.execute(
                "INSERT INTO usage (request_id, account_id, channel, model, input_tokens, \
                 output_tokens, cache_creation_input_tokens, cache_read_input_tokens, \
                 total_tokens, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    request_id,
                    account_id,
                    channel,
                    model,
                    input_tokens,
                    output_tokens,
                    cache_creation_input_tokens,
                    cache_read_input_tokens,
                    total_tokens,
                    now_iso,
                ],
            )
        })?;
        Ok(())
    }

    /// Grouped totals over `window`, keyed by `group_by`.
    pub fn summarize(&self, window: UsageWindow, group_by: UsageGroupBy, now_iso: &str) -> Result<Vec<UsageSummary>, AccountStoreError> {
        let group_col = match group_by {
            UsageGroupBy::Model => "model",
            UsageGroupBy::Account => "account_id",
            UsageGroupBy::All => "'all'",
        };

        let cutoff = window.hours().map(|hours| shift_iso_hours(now_iso, -hours));

        let sql = format!(
            "SELECT {group_col} AS key, COUNT(*), COALESCE(SUM(input_tokens),0), \
             COALESCE(SUM(output_tokens),0), COALESCE(SUM(cache_creation_input_tokens),0), \
             COALESCE(SUM(cache_read_input_tokens),0), COALESCE(SUM(total_tokens),0) \
             FROM usage{} GROUP BY {group_col} ORDER BY key",
            if cutoff.is_some() { " WHERE timestamp >= ?1" } else { "" }
        );

        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = if let Some(cutoff) = &cutoff {
                stmt.query_map(params![cutoff], row_to_summary)?.collect::<Result<Vec<_>, _>>()
            } else {
                stmt.query_map([], row_to_summary)?.collect::<Result<Vec<_>, _>>()
            };
            rows
        })
        .map_err(Into::into)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageSummary> {
    Ok(UsageSummary {
        key: row.get(0)?,
        request_count: row.get(1)?,
        input_tokens: row.get(2)?,
        output_tokens: row.get(3)?,
        cache_creation_input_tokens: row.get(4)?,
        cache_read_input_tokens: row.get(5)?,
        total_tokens: row.get(6)?,
    })
}

fn shift_iso_hours(now_iso: &str, hours: i64) -> String {
    match chrono::DateTime::parse_from_rfc3339(now_iso) {
        Ok(dt) => (dt + chrono::Duration::hours(hours)).to_rfc3339(),
        Err(_) => now_iso.to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
