//! `AppConfig` type definition.
//!
//! A single flat, server-authoritative configuration struct. Loaded once at
//! startup and threaded through `AppState` as an `Arc<AppConfig>`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Account-store backend selector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    /// SQLite file at `database.sqlite_path`.
    Sqlite,
    /// MySQL, configured via `mysql_host`/`mysql_port`/`mysql_user`/`mysql_password`/`mysql_database`.
    Mysql,
}

impl Default for DatabaseBackend {
    fn default() -> Self {
        Self::Sqlite
    }
}

/// Root application configuration.
///
/// All field names are `snake_case` to match the environment variable
/// naming convention (`API_KEY` → `api_key`, etc).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AppConfig {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// If set, `/v1/*` requires a matching `x-api-key` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Directory for on-disk state (SQLite file, logs) when not using MySQL.
    pub data_dir: String,
    /// Account-store backend.
    pub database_backend: DatabaseBackend,
    /// SQLite file path, used when `database_backend` is `Sqlite`.
    pub sqlite_path: String,
    /// MySQL host, required when `database_backend` is `Mysql`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_host: Option<String>,
    /// MySQL port.
    pub mysql_port: u16,
    /// MySQL username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_user: Option<String>,
    /// MySQL password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_password: Option<String>,
    /// MySQL database name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_database: Option<String>,
    /// Gemini OAuth onboarding client id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_donate_client_id: Option<String>,
    /// Gemini OAuth onboarding client secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_donate_client_secret: Option<String>,
    /// Enables the token manager's background refresh scheduler.
    pub enable_auto_refresh: bool,
    /// Hours between scheduled token refresh sweeps.
    pub token_refresh_interval_hours: u64,
    /// Binds a streaming response to the account that opened it; default on.
    pub enable_session_binding: bool,
    /// Emits a warning instead of silently dropping duplicate tool-use blocks.
    pub enable_tool_dedup: bool,
    /// Advisory input-token ceiling used for the CodeWhisperer channel.
    pub amazonq_max_input_tokens: u32,
    /// Skips the router's pre-flight token-estimate check.
    pub disable_input_validation: bool,
    /// Prompt-cache entry time-to-live, in seconds.
    pub cache_ttl_secs: u64,
    /// Prompt-cache maximum entry count (LRU eviction beyond this).
    pub cache_capacity: usize,
    /// Model ids that must route to the gemini channel regardless of
    /// selection weighting. Whitelisted admin-editable key (`/v2/config`).
    pub gemini_only_models: Vec<String>,
    /// Model ids that must route to the amazonq channel. Whitelisted
    /// admin-editable key (`/v2/config`).
    pub amazonq_only_models: Vec<String>,
    /// The full set of model ids the router will accept on `/v1/messages`;
    /// an empty list means no restriction. Whitelisted admin-editable key.
    pub supported_models: Vec<String>,
    /// Requested-model -> target-model overrides applied on top of each
    /// channel's own mapping table. Whitelisted admin-editable key.
    pub model_mapping: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            api_key: None,
            data_dir: "./data".to_owned(),
            database_backend: DatabaseBackend::default(),
            sqlite_path: "./data/accounts.db".to_owned(),
            mysql_host: None,
            mysql_port: 3306,
            mysql_user: None,
            mysql_password: None,
            mysql_database: None,
            gemini_donate_client_id: None,
            gemini_donate_client_secret: None,
            enable_auto_refresh: true,
            token_refresh_interval_hours: 6,
            enable_session_binding: true,
            enable_tool_dedup: true,
            amazonq_max_input_tokens: 100_000,
            disable_input_validation: false,
            cache_ttl_secs: llmrelay_core::constants::DEFAULT_CACHE_TTL_SECS,
            cache_capacity: 10_000,
            gemini_only_models: Vec::new(),
            amazonq_only_models: Vec::new(),
            supported_models: Vec::new(),
            model_mapping: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_backend, DatabaseBackend::Sqlite);
        assert!(config.enable_auto_refresh);
        assert_eq!(config.token_refresh_interval_hours, 6);
        assert!(config.enable_session_binding);
        assert!(config.enable_tool_dedup);
        assert_eq!(config.amazonq_max_input_tokens, 100_000);
        assert!(!config.disable_input_validation);
    }

    #[test]
    fn serde_field_names_are_snake_case() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        assert!(json.get("token_refresh_interval_hours").is_some());
        assert!(json.get("enable_session_binding").is_some());
        assert!(json.get("api_key").is_none());
    }

    #[test]
    fn empty_json_produces_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, AppConfig::default().port);
    }

    #[test]
    fn partial_json_overrides() {
        let json = serde_json::json!({"port": 9090, "enable_auto_refresh": false});
        let config: AppConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.port, 9090);
        assert!(!config.enable_auto_refresh);
        assert_eq!(config.data_dir, AppConfig::default().data_dir);
    }
}
