//! # llmrelay-config
//!
//! Layered configuration loading for the proxy.
//!
//! Config is assembled from three layers (in priority order):
//! 1. **Compiled defaults** — [`AppConfig::default()`]
//! 2. **Config file** — `./config.json` (deep-merged over defaults)
//! 3. **Environment variables** — highest priority
//!
//! Config is loaded once at startup by `llmrelay-server` and wrapped in an
//! `Arc<AppConfig>` inside `AppState`; this crate has no global singleton.
//!
//! # Usage
//!
//! ```no_run
//! use llmrelay_config::load_config;
//!
//! let config = load_config().unwrap();
//! println!("listening on {}:{}", config.host, config.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{config_path, deep_merge, load_config, load_config_from_path};
pub use types::{AppConfig, DatabaseBackend};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
