//! # llmrelay-accounts
//!
//! The account store, selection distributor, token refresh manager, and
//! usage ledger backing the proxy's multi-account pooling.
//!
//! Accounts are persisted in `SQLite` via [`store::AccountStore`]; selection
//! scoring and in-memory usage counters live in [`distributor`]; per-kind
//! OAuth/bearer refresh lives in [`token_manager`]; per-call accounting for
//! the usage-summary surface lives in [`usage`].

#![deny(unsafe_code)]

pub mod distributor;
pub mod errors;
pub mod store;
pub mod token_manager;
pub mod types;
pub mod usage;

pub use distributor::Distributor;
pub use errors::AccountStoreError;
pub use store::{AccountPatch, AccountStore};
pub use token_manager::{RefreshOutcome, TokenManager};
pub use types::{Account, AccountKind, AccountUsageRecord, CallStats, ModelMapping};
pub use usage::{UsageGroupBy, UsageStore, UsageSummary, UsageWindow};
