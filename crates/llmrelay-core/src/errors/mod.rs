//! Error hierarchy for the proxy.
//!
//! Built on [`thiserror`]:
//!
//! - [`ProxyError`]: top-level enum covering every failure surface the HTTP
//!   layer has to turn into a response (account selection, token refresh,
//!   upstream provider calls, persistence, request validation).
//! - [`PersistenceError`]: account-store read/write failures with table and
//!   operation context.
//! - [`ErrorCollector`]: accumulates errors from fire-and-forget operations
//!   (e.g. background token refreshes) without losing them.
//!
//! The error-string classification in [`parse`] is used to map a raw
//! upstream error body onto [`parse::ErrorCategory`] for logging and retry
//! decisions; `ProxyError` itself is what every handler actually returns.

pub mod parse;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::parse::{ErrorCategory, parse_error};

// ─────────────────────────────────────────────────────────────────────────────
// ProxyError — top-level error enum
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type returned by account selection, token management,
/// provider dispatch, and request validation.
///
/// Every variant maps onto an Anthropic-shaped error body (`{"type":
/// "error", "error": {"type": ..., "message": ...}}`) and an HTTP status at
/// the server boundary; see `llmrelay-server`'s response conversion.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No account in the pool is eligible (all suspended, cooling down, or
    /// excluded by the caller's channel).
    #[error("no account available for channel {channel}")]
    NoAccountAvailable {
        /// Provider channel that was being routed.
        channel: String,
    },

    /// An account's refresh token could not be exchanged for a new access
    /// token.
    #[error("token refresh failed for account {account_id}: {message}")]
    TokenRefreshFailed {
        /// Account whose refresh attempt failed.
        account_id: String,
        /// Human-readable detail from the token endpoint.
        message: String,
    },

    /// The account's refresh token itself was rejected (`invalid_grant`)
    /// and the account has been marked suspended.
    #[error("account {account_id} suspended")]
    AccountSuspended {
        /// The suspended account.
        account_id: String,
    },

    /// Upstream returned 429.
    #[error("upstream rate limited, retry after {retry_after_ms}ms")]
    UpstreamRateLimited {
        /// Delay to honor before the next attempt, from `Retry-After` or a default.
        retry_after_ms: u64,
    },

    /// Upstream returned a 5xx.
    #[error("upstream server error (status {status})")]
    UpstreamServerError {
        /// The HTTP status upstream returned.
        status: u16,
    },

    /// The TCP/TLS connection to upstream failed or timed out.
    #[error("upstream network error: {message}")]
    UpstreamNetworkError {
        /// Underlying transport error message.
        message: String,
    },

    /// Upstream returned a 2xx body (or SSE frame) that could not be parsed
    /// into the expected shape.
    #[error("failed to parse upstream response: {message}")]
    UpstreamParseError {
        /// Parse failure detail.
        message: String,
    },

    /// The client's request failed validation before any upstream call was made.
    #[error("invalid request: {message}")]
    Validation {
        /// Human-readable validation failure.
        message: String,
    },

    /// Admin or device-authorization credential check failed.
    #[error("authentication error: {message}")]
    Auth {
        /// Human-readable detail.
        message: String,
    },

    /// Account-store read/write failure.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// Generic internal error with structured context, used for failures
    /// that don't fit one of the named variants above.
    #[error("[{code}] {message}")]
    Internal {
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Error category, inferred from the message if not set explicitly.
        category: ErrorCategory,
        /// Original error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ProxyError {
    /// Build an internal error from an arbitrary message, classifying it via
    /// [`parse_error`].
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let parsed = parse_error(message);
        Self::Internal {
            code: parsed.category.to_string().to_uppercase(),
            message: parsed.message,
            category: parsed.category,
            source: None,
        }
    }

    /// Error category for logging and alerting.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoAccountAvailable { .. } | Self::AccountSuspended { .. } => {
                ErrorCategory::Authorization
            }
            Self::TokenRefreshFailed { .. } | Self::Auth { .. } => ErrorCategory::Authentication,
            Self::UpstreamRateLimited { .. } => ErrorCategory::RateLimit,
            Self::UpstreamServerError { .. } => ErrorCategory::Server,
            Self::UpstreamNetworkError { .. } => ErrorCategory::Network,
            Self::UpstreamParseError { .. } => ErrorCategory::Unknown,
            Self::Validation { .. } => ErrorCategory::InvalidRequest,
            Self::Persistence(_) => ErrorCategory::Unknown,
            Self::Internal { category, .. } => *category,
        }
    }

    /// Whether the router should retry on a different account/channel.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited { .. }
                | Self::UpstreamServerError { .. }
                | Self::UpstreamNetworkError { .. }
        )
    }

    /// The Anthropic-shaped `error.type` string for the HTTP response body.
    #[must_use]
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::NoAccountAvailable { .. } | Self::AccountSuspended { .. } => "permission_error",
            Self::TokenRefreshFailed { .. } | Self::Auth { .. } => "authentication_error",
            Self::UpstreamRateLimited { .. } => "rate_limit_error",
            Self::UpstreamServerError { .. } => "api_error",
            Self::UpstreamNetworkError { .. } => "api_error",
            Self::UpstreamParseError { .. } => "api_error",
            Self::Validation { .. } => "invalid_request_error",
            Self::Persistence(_) | Self::Internal { .. } => "api_error",
        }
    }

    /// The HTTP status code to answer the client with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoAccountAvailable { .. } => 503,
            Self::AccountSuspended { .. } => 403,
            Self::TokenRefreshFailed { .. } | Self::Auth { .. } => 401,
            Self::UpstreamRateLimited { .. } => 429,
            Self::UpstreamServerError { status } => *status,
            Self::UpstreamNetworkError { .. } => 502,
            Self::UpstreamParseError { .. } => 502,
            Self::Validation { .. } => 400,
            Self::Persistence(_) | Self::Internal { .. } => 500,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PersistenceError
// ─────────────────────────────────────────────────────────────────────────────

/// Database operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceOperation {
    /// Reading from the store.
    Read,
    /// Writing to the store.
    Write,
    /// Deleting from the store.
    Delete,
    /// Querying the store.
    Query,
}

impl fmt::Display for PersistenceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Delete => write!(f, "delete"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Account-store (SQLite) persistence error.
#[derive(Debug, Error)]
#[error("persistence {operation} failed on {table}: {message}")]
pub struct PersistenceError {
    /// Table that failed.
    pub table: String,
    /// Operation that failed.
    pub operation: PersistenceOperation,
    /// Human-readable message.
    pub message: String,
    /// Original cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PersistenceError {
    /// Create a new persistence error.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        operation: PersistenceOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Set the error cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ErrorCollector
// ─────────────────────────────────────────────────────────────────────────────

/// Collects errors from fire-and-forget operations without losing them.
///
/// Used by the account distributor's background refresh loop, where each
/// account's refresh can fail independently without aborting the sweep.
///
/// # Example
///
/// ```
/// use llmrelay_core::errors::ErrorCollector;
///
/// let mut collector = ErrorCollector::new();
/// collector.collect("refresh 1 failed");
/// collector.collect("refresh 2 failed");
/// assert_eq!(collector.count(), 2);
///
/// let errors = collector.flush();
/// assert_eq!(errors.len(), 2);
/// assert_eq!(collector.count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<ProxyError>,
}

impl ErrorCollector {
    /// Create a new empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect an error, wrapping it in [`ProxyError`] if needed.
    pub fn collect(&mut self, error: impl Into<String>) {
        self.errors.push(ProxyError::from_message(&error.into()));
    }

    /// Collect an existing [`ProxyError`].
    pub fn collect_error(&mut self, error: ProxyError) {
        self.errors.push(error);
    }

    /// Whether any errors have been collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of collected errors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.len()
    }

    /// View collected errors.
    #[must_use]
    pub fn errors(&self) -> &[ProxyError] {
        &self.errors
    }

    /// Get and clear all collected errors.
    pub fn flush(&mut self) -> Vec<ProxyError> {
        std::mem::take(&mut self.errors)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_account_available_maps_to_503() {
        let err = ProxyError::NoAccountAvailable { channel: "amazonq".into() };
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.wire_type(), "permission_error");
    }

    #[test]
    fn upstream_rate_limited_is_retryable() {
        let err = ProxyError::UpstreamRateLimited { retry_after_ms: 2000 };
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn upstream_server_error_preserves_status() {
        let err = ProxyError::UpstreamServerError { status: 529 };
        assert_eq!(err.status_code(), 529);
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = ProxyError::Validation { message: "missing max_tokens".into() };
        assert!(!err.is_retryable());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.wire_type(), "invalid_request_error");
    }

    #[test]
    fn account_suspended_display() {
        let err = ProxyError::AccountSuspended { account_id: "acct-1".into() };
        assert!(err.to_string().contains("acct-1"));
    }

    #[test]
    fn from_message_classifies_rate_limit() {
        let err = ProxyError::from_message("429 rate limit exceeded");
        assert_eq!(err.category(), ErrorCategory::RateLimit);
    }

    #[test]
    fn from_persistence() {
        let persistence_err =
            PersistenceError::new("accounts", PersistenceOperation::Write, "disk full");
        let err = ProxyError::from(persistence_err);
        assert!(err.to_string().contains("accounts"));
    }

    #[test]
    fn persistence_error_with_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "sqlite busy");
        let err = PersistenceError::new("accounts", PersistenceOperation::Read, "locked")
            .with_source(cause);
        assert!(err.source.is_some());
    }

    #[test]
    fn persistence_operation_display() {
        assert_eq!(PersistenceOperation::Read.to_string(), "read");
        assert_eq!(PersistenceOperation::Write.to_string(), "write");
        assert_eq!(PersistenceOperation::Delete.to_string(), "delete");
        assert_eq!(PersistenceOperation::Query.to_string(), "query");
    }

    #[test]
    fn error_collector_empty() {
        let collector = ErrorCollector::new();
        assert!(!collector.has_errors());
        assert_eq!(collector.count(), 0);
        assert!(collector.errors().is_empty());
    }

    #[test]
    fn error_collector_collect_strings() {
        let mut collector = ErrorCollector::new();
        collector.collect("refresh 1 failed");
        collector.collect("refresh 2 failed");
        assert!(collector.has_errors());
        assert_eq!(collector.count(), 2);
    }

    #[test]
    fn error_collector_collect_error() {
        let mut collector = ErrorCollector::new();
        collector.collect_error(ProxyError::Validation { message: "bad".into() });
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn error_collector_flush() {
        let mut collector = ErrorCollector::new();
        collector.collect("error 1");
        collector.collect("error 2");
        let errors = collector.flush();
        assert_eq!(errors.len(), 2);
        assert_eq!(collector.count(), 0);
        assert!(!collector.has_errors());
    }

    #[test]
    fn error_collector_default() {
        let collector = ErrorCollector::default();
        assert!(!collector.has_errors());
    }

    #[test]
    fn proxy_error_is_std_error() {
        let err = ProxyError::Validation { message: "m".into() };
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn persistence_error_is_std_error() {
        let err = PersistenceError::new("t", PersistenceOperation::Read, "err");
        let _: &dyn std::error::Error = &err;
    }
}
