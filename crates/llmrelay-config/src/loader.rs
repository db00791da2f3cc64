//! Configuration loading: compiled defaults, optional JSON file, environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AppConfig::default()`]
//! 2. If `./config.json` exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{AppConfig, DatabaseBackend};

/// Resolve the path to the config file (`./config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    PathBuf::from("./config.json")
}

/// Load config from the default path with env var overrides.
pub fn load_config() -> Result<AppConfig> {
    load_config_from_path(&config_path())
}

/// Load config from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults merged with env overrides.
/// If the file contains invalid JSON, returns an error — a bad config file
/// is a hard startup failure.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    let defaults = serde_json::to_value(AppConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: AppConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to a loaded config.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are silently ignored (fall back to file/default)
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(v) = read_env_string("API_KEY") {
        config.api_key = Some(v);
    }
    if let Some(v) = read_env_u16("PORT", 1, 65535) {
        config.port = v;
    }
    if let Some(v) = read_env_string("MYSQL_HOST") {
        config.database_backend = DatabaseBackend::Mysql;
        config.mysql_host = Some(v);
    }
    if let Some(v) = read_env_u16("MYSQL_PORT", 1, 65535) {
        config.mysql_port = v;
    }
    if let Some(v) = read_env_string("MYSQL_USER") {
        config.mysql_user = Some(v);
    }
    if let Some(v) = read_env_string("MYSQL_PASSWORD") {
        config.mysql_password = Some(v);
    }
    if let Some(v) = read_env_string("MYSQL_DATABASE") {
        config.mysql_database = Some(v);
    }
    if let Some(v) = read_env_string("GEMINI_DONATE_CLIENT_ID") {
        config.gemini_donate_client_id = Some(v);
    }
    if let Some(v) = read_env_string("GEMINI_DONATE_CLIENT_SECRET") {
        config.gemini_donate_client_secret = Some(v);
    }
    if let Some(v) = read_env_bool("ENABLE_AUTO_REFRESH") {
        config.enable_auto_refresh = v;
    }
    if let Some(v) = read_env_u64("TOKEN_REFRESH_INTERVAL_HOURS", 1, 168) {
        config.token_refresh_interval_hours = v;
    }
    if let Some(v) = read_env_bool("ENABLE_SESSION_BINDING") {
        config.enable_session_binding = v;
    }
    if let Some(v) = read_env_bool("ENABLE_TOOL_DEDUP") {
        config.enable_tool_dedup = v;
    }
    if let Some(v) = read_env_u64("AMAZONQ_MAX_INPUT_TOKENS", 1, 10_000_000) {
        #[allow(clippy::cast_possible_truncation)]
        let v = v as u32;
        config.amazonq_max_input_tokens = v;
    }
    if let Some(v) = read_env_bool("DISABLE_INPUT_VALIDATION") {
        config.disable_input_validation = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
#[must_use]
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
#[must_use]
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
#[must_use]
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
