//! `SQLite`-backed account store (C5).
//!
//! Owns the `accounts` and `call_logs` tables exclusively. Backed by
//! `rusqlite` + `r2d2_sqlite` pooling — swapping the backend (e.g. to MySQL)
//! is out of scope; this module implements the row-store *interface* that
//! C5/C6/C7/C9 depend on.

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::AccountStoreError;
use crate::types::{Account, AccountKind, CallStats};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    kind TEXT NOT NULL,
    client_id TEXT,
    client_secret TEXT,
    refresh_token TEXT,
    access_token TEXT,
    other_json TEXT NOT NULL DEFAULT '{}',
    last_refresh_time TEXT,
    last_refresh_status TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    weight INTEGER NOT NULL DEFAULT 50,
    rate_limit_per_hour INTEGER NOT NULL DEFAULT 20,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS call_logs (
    account_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    model TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_call_logs_account_ts ON call_logs(account_id, timestamp);
";

/// A field-level patch for [`AccountStore::update`]. `None` leaves the
/// field untouched.
#[derive(Clone, Debug, Default)]
pub struct AccountPatch {
    /// New label, if changing.
    pub label: Option<String>,
    /// New `other_json` bag, if changing (replaces wholesale).
    pub other: Option<serde_json::Value>,
    /// New enabled flag, if changing.
    pub enabled: Option<bool>,
    /// New weight, if changing.
    pub weight: Option<i64>,
    /// New per-hour rate limit, if changing.
    pub rate_limit_per_hour: Option<i64>,
}

/// `SQLite` pragma customizer that runs on each new connection: WAL mode so
/// readers don't block the distributor's writes, plus a busy timeout so
/// concurrent refreshes don't immediately fail with `SQLITE_BUSY`.
#[derive(Debug)]
struct PragmaCustomizer;

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
    }
}

/// `SQLite`-backed account store.
#[derive(Clone)]
pub struct AccountStore {
    pool: Pool<SqliteConnectionManager>,
}

impl AccountStore {
    /// Open (creating if absent) the account database at `path`.
    pub fn open(path: &Path) -> Result<Self, AccountStoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(16)
            .connection_timeout(std::time::Duration::from_secs(5))
            .connection_customizer(Box::new(PragmaCustomizer))
            .build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Open an in-memory database. Intended for tests. Pinned to a single
    /// pooled connection, since each `:memory:` connection is otherwise its
    /// own empty database.
    pub fn open_in_memory() -> Result<Self, AccountStoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Run `f` against a pooled connection, for callers in this crate that
    /// need direct access to tables this store doesn't otherwise expose
    /// (e.g. the usage tracker's `usage` table, sharing the same database).
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> Result<T, AccountStoreError> {
        let conn = self.pool.get()?;
        f(&conn).map_err(Into::into)
    }

    /// List all enabled accounts, optionally filtered by kind.
    pub fn list_enabled(&self, kind: Option<AccountKind>) -> Result<Vec<Account>, AccountStoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, label, kind, client_id, client_secret, refresh_token, access_token, \
             other_json, last_refresh_time, last_refresh_status, enabled, weight, \
             rate_limit_per_hour, created_at, updated_at FROM accounts WHERE enabled = 1",
        )?;
        let rows = stmt.query_map([], row_to_account)?;
        let mut accounts = Vec::new();
        for row in rows {
            let account = row?;
            if kind.is_none_or(|k| account.kind == k) {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    /// List every account regardless of `enabled`.
    pub fn list_all(&self) -> Result<Vec<Account>, AccountStoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, label, kind, client_id, client_secret, refresh_token, access_token, \
             other_json, last_refresh_time, last_refresh_status, enabled, weight, \
             rate_limit_per_hour, created_at, updated_at FROM accounts",
        )?;
        let rows = stmt.query_map([], row_to_account)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Fetch one account by id.
    pub fn get(&self, id: &str) -> Result<Account, AccountStoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, label, kind, client_id, client_secret, refresh_token, access_token, \
             other_json, last_refresh_time, last_refresh_status, enabled, weight, \
             rate_limit_per_hour, created_at, updated_at FROM accounts WHERE id = ?1",
            params![id],
            row_to_account,
        )
        .optional()?
        .ok_or_else(|| AccountStoreError::NotFound(id.to_owned()))
    }

    /// Insert a new account, stamping `created_at`/`updated_at` to `now`.
    pub fn create(&self, account: &Account) -> Result<(), AccountStoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO accounts (id, label, kind, client_id, client_secret, refresh_token, \
             access_token, other_json, last_refresh_time, last_refresh_status, enabled, weight, \
             rate_limit_per_hour, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                account.id,
                account.label,
                account.kind.as_str(),
                account.client_id,
                account.client_secret,
                account.refresh_token,
                account.access_token,
                account.other.to_string(),
                account.last_refresh_time,
                account.last_refresh_status,
                account.enabled,
                account.weight,
                account.rate_limit_per_hour,
                account.created_at,
                account.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Apply a partial update, bumping `updated_at` to `now_iso`.
    pub fn update(&self, id: &str, patch: &AccountPatch, now_iso: &str) -> Result<(), AccountStoreError> {
        let mut account = self.get(id)?;
        if let Some(label) = &patch.label {
            account.label.clone_from(label);
        }
        if let Some(other) = &patch.other {
            account.other = other.clone();
        }
        if let Some(enabled) = patch.enabled {
            account.enabled = enabled;
        }
        if let Some(weight) = patch.weight {
            account.weight = weight;
        }
        if let Some(limit) = patch.rate_limit_per_hour {
            account.rate_limit_per_hour = limit;
        }
        account.updated_at = now_iso.to_owned();

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE accounts SET label = ?1, other_json = ?2, enabled = ?3, weight = ?4, \
             rate_limit_per_hour = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                account.label,
                account.other.to_string(),
                account.enabled,
                account.weight,
                account.rate_limit_per_hour,
                account.updated_at,
                id,
            ],
        )?;
        Ok(())
    }

    /// Delete an account and its call logs.
    pub fn delete(&self, id: &str) -> Result<(), AccountStoreError> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM call_logs WHERE account_id = ?1", params![id])?;
        conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Persist a refreshed token set.
    pub fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        status: &str,
        now_iso: &str,
    ) -> Result<(), AccountStoreError> {
        let conn = self.pool.get()?;
        if let Some(refresh_token) = refresh_token {
            conn.execute(
                "UPDATE accounts SET access_token = ?1, refresh_token = ?2, \
                 last_refresh_time = ?3, last_refresh_status = ?4, updated_at = ?3 WHERE id = ?5",
                params![access_token, refresh_token, now_iso, status, id],
            )?;
        } else {
            conn.execute(
                "UPDATE accounts SET access_token = ?1, last_refresh_time = ?2, \
                 last_refresh_status = ?3, updated_at = ?2 WHERE id = ?4",
                params![access_token, now_iso, status, id],
            )?;
        }
        Ok(())
    }

    /// Append a call-log row.
    pub fn record_call(&self, id: &str, model: &str, now_iso: &str) -> Result<(), AccountStoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO call_logs (account_id, timestamp, model) VALUES (?1, ?2, ?3)",
            params![id, now_iso, model],
        )?;
        Ok(())
    }

    /// Whether the account is still under its `rate_limit_per_hour` ceiling.
    pub fn check_rate_limit(&self, id: &str, now_iso: &str) -> Result<bool, AccountStoreError> {
        let stats = self.call_stats(id, now_iso)?;
        Ok(stats.remaining > 0)
    }

    /// Hour/day/total call counts plus the account's configured limit.
    pub fn call_stats(&self, id: &str, now_iso: &str) -> Result<CallStats, AccountStoreError> {
        let account = self.get(id)?;
        let conn = self.pool.get()?;

        let hour_cutoff = shift_iso_hours(now_iso, -1);
        let day_cutoff = shift_iso_hours(now_iso, -24);

        let hour: i64 = conn.query_row(
            "SELECT COUNT(*) FROM call_logs WHERE account_id = ?1 AND timestamp >= ?2",
            params![id, hour_cutoff],
            |r| r.get(0),
        )?;
        let day: i64 = conn.query_row(
            "SELECT COUNT(*) FROM call_logs WHERE account_id = ?1 AND timestamp >= ?2",
            params![id, day_cutoff],
            |r| r.get(0),
        )?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM call_logs WHERE account_id = ?1",
            params![id],
            |r| r.get(0),
        )?;

        Ok(CallStats {
            hour,
            day,
            total,
            limit: account.rate_limit_per_hour,
            remaining: (account.rate_limit_per_hour - hour).max(0),
        })
    }

    /// Prune call-log rows older than the longest query window (24h).
    pub fn prune_call_logs(&self, now_iso: &str) -> Result<usize, AccountStoreError> {
        let cutoff = shift_iso_hours(now_iso, -24);
        let conn = self.pool.get()?;
        let deleted = conn.execute("DELETE FROM call_logs WHERE timestamp < ?1", params![cutoff])?;
        Ok(deleted)
    }

    /// Record that a model is exhausted on this account's credits, per
    /// `other.creditsInfo.models[model].{remainingFraction, resetTime}`.
    pub fn mark_model_exhausted(
        &self,
        id: &str,
        model: &str,
        reset_time_iso: &str,
        now_iso: &str,
    ) -> Result<(), AccountStoreError> {
        let mut account = self.get(id)?;
        let credits = account
            .other
            .as_object_mut()
            .map(|obj| obj.entry("creditsInfo").or_insert_with(|| serde_json::json!({})));
        if let Some(credits) = credits {
            let models = credits
                .as_object_mut()
                .map(|obj| obj.entry("models").or_insert_with(|| serde_json::json!({})));
            if let Some(models) = models {
                if let Some(models_obj) = models.as_object_mut() {
                    let _ = models_obj.insert(
                        model.to_owned(),
                        serde_json::json!({"remainingFraction": 0.0, "resetTime": reset_time_iso}),
                    );
                }
            }
        }

        self.update(
            id,
            &AccountPatch {
                other: Some(account.other),
                ..Default::default()
            },
            now_iso,
        )
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let kind_str: String = row.get(2)?;
    let other_json: String = row.get(7)?;
    Ok(Account {
        id: row.get(0)?,
        label: row.get(1)?,
        kind: AccountKind::from_str_lossy(&kind_str).unwrap_or(AccountKind::CustomApi),
        client_id: row.get(3)?,
        client_secret: row.get(4)?,
        refresh_token: row.get(5)?,
        access_token: row.get(6)?,
        other: serde_json::from_str(&other_json).unwrap_or_else(|_| serde_json::json!({})),
        last_refresh_time: row.get(8)?,
        last_refresh_status: row.get(9)?,
        enabled: row.get(10)?,
        weight: row.get(11)?,
        rate_limit_per_hour: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Shift an RFC3339 timestamp by `hours` (may be negative), for window
/// cutoffs. Falls back to the input string unchanged if it can't be parsed
/// (the query then degrades to "everything counts", which is the safe
/// direction for a rate limit).
fn shift_iso_hours(now_iso: &str, hours: i64) -> String {
    match chrono::DateTime::parse_from_rfc3339(now_iso) {
        Ok(dt) => (dt + chrono::Duration::hours(hours)).to_rfc3339(),
        Err(_) => now_iso.to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(id: &str, kind: AccountKind) -> Account {
        Account {
            id: id.to_owned(),
            label: "test".to_owned(),
            kind,
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
            created_at: "2026-01-01T00:00:00Z".to_owned(),
            updated_at: "2026-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = AccountStore::open_in_memory().unwrap();
        let account = sample_account("acct_1", AccountKind::Amazonq);
        store.create(&account).unwrap();

        let fetched = store.get("acct_1").unwrap();
        assert_eq!(fetched.label, "test");
        assert_eq!(fetched.kind, AccountKind::Amazonq);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = AccountStore::open_in_memory().unwrap();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, AccountStoreError::NotFound(_)));
    }

    #[test]
    fn list_enabled_filters_by_kind_and_enabled() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("a1", AccountKind::Amazonq)).unwrap();
        store.create(&sample_account("a2", AccountKind::Gemini)).unwrap();
        let mut disabled = sample_account("a3", AccountKind::Amazonq);
        disabled.enabled = false;
        store.create(&disabled).unwrap();

        let amazonq = store.list_enabled(Some(AccountKind::Amazonq)).unwrap();
        assert_eq!(amazonq.len(), 1);
        assert_eq!(amazonq[0].id, "a1");

        let all_enabled = store.list_enabled(None).unwrap();
        assert_eq!(all_enabled.len(), 2);
    }

    #[test]
    fn update_applies_patch_fields() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Amazonq)).unwrap();

        store
            .update(
                "acct_1",
                &AccountPatch {
                    weight: Some(80),
                    enabled: Some(false),
                    ..Default::default()
                },
                "2026-01-02T00:00:00Z",
            )
            .unwrap();

        let account = store.get("acct_1").unwrap();
        assert_eq!(account.weight, 80);
        assert!(!account.enabled);
        assert_eq!(account.updated_at, "2026-01-02T00:00:00Z");
    }

    #[test]
    fn delete_removes_account_and_call_logs() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Amazonq)).unwrap();
        store.record_call("acct_1", "claude-sonnet-4-6", "2026-01-01T00:00:00Z").unwrap();

        store.delete("acct_1").unwrap();
        assert!(matches!(store.get("acct_1"), Err(AccountStoreError::NotFound(_))));
    }

    #[test]
    fn update_tokens_rotates_refresh_token() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Amazonq)).unwrap();

        store
            .update_tokens("acct_1", "new_access", Some("new_refresh"), "success", "2026-01-02T00:00:00Z")
            .unwrap();

        let account = store.get("acct_1").unwrap();
        assert_eq!(account.access_token.as_deref(), Some("new_access"));
        assert_eq!(account.refresh_token.as_deref(), Some("new_refresh"));
        assert_eq!(account.last_refresh_status.as_deref(), Some("success"));
    }

    #[test]
    fn call_stats_counts_within_windows() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Amazonq)).unwrap();

        store.record_call("acct_1", "m", "2026-01-02T11:30:00+00:00").unwrap();
        store.record_call("acct_1", "m", "2026-01-01T13:00:00+00:00").unwrap();
        store.record_call("acct_1", "m", "2025-01-01T00:00:00+00:00").unwrap();

        let stats = store.call_stats("acct_1", "2026-01-02T12:00:00+00:00").unwrap();
        assert_eq!(stats.hour, 1);
        assert_eq!(stats.day, 2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.limit, 20);
        assert_eq!(stats.remaining, 19);
    }

    #[test]
    fn check_rate_limit_respects_configured_ceiling() {
        let store = AccountStore::open_in_memory().unwrap();
        let mut account = sample_account("acct_1", AccountKind::Amazonq);
        account.rate_limit_per_hour = 2;
        store.create(&account).unwrap();

        let now = "2026-01-02T12:00:00+00:00";
        store.record_call("acct_1", "m", now).unwrap();
        store.record_call("acct_1", "m", now).unwrap();

        assert!(!store.check_rate_limit("acct_1", now).unwrap());
    }

    #[test]
    fn mark_model_exhausted_updates_credits_info() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Gemini)).unwrap();

        store
            .mark_model_exhausted("acct_1", "gemini-2.5-pro", "2026-02-01T00:00:00Z", "2026-01-02T00:00:00Z")
            .unwrap();

        let account = store.get("acct_1").unwrap();
        let reset_time = &account.other["creditsInfo"]["models"]["gemini-2.5-pro"]["resetTime"];
        assert_eq!(reset_time, "2026-02-01T00:00:00Z");
    }

    #[test]
    fn prune_call_logs_removes_old_rows() {
        let store = AccountStore::open_in_memory().unwrap();
        store.create(&sample_account("acct_1", AccountKind::Amazonq)).unwrap();
        store.record_call("acct_1", "m", "2020-01-01T00:00:00+00:00").unwrap();
        store.record_call("acct_1", "m", "2026-01-02T11:00:00+00:00").unwrap();

        let pruned = store.prune_call_logs("2026-01-02T12:00:00+00:00").unwrap();
        assert_eq!(pruned, 1);

        let stats = store.call_stats("acct_1", "2026-01-02T12:00:00+00:00").unwrap();
        assert_eq!(stats.total, 1);
    }
}
