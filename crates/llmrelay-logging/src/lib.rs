//! # llmrelay-logging
//!
//! Structured logging setup built on `tracing` + `tracing-subscriber`.
//!
//! Call [`init`] once at process start. Request handlers then wrap their work
//! in a `#[tracing::instrument(skip_all, fields(request_id, channel, model, account_id))]`
//! span; token refreshes, cache hits/misses, and account selections emit
//! `tracing::debug!`/`tracing::warn!` at their decision points.

#![deny(unsafe_code)]

pub mod types;

pub use types::LogLevel;

use tracing_subscriber::{fmt, EnvFilter};

/// Output format for the process-wide subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, ANSI-colored — for interactive terminals.
    Pretty,
    /// One JSON object per line — for non-interactive/production environments.
    Json,
}

/// Initialize the global `tracing` subscriber.
///
/// Reads the `RUST_LOG` env filter directive (default `info` if unset or
/// invalid). Call exactly once; a second call is a no-op (the global default
/// subscriber can only be set once per process).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Json => subscriber.json().try_init(),
        LogFormat::Pretty => subscriber.try_init(),
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already initialized: {err}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
