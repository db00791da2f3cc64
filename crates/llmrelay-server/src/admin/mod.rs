//! `/v2` admin surface: account CRUD and config (§6).
//!
//! The full login/session/2FA subsystem and the device-authorization OAuth
//! onboarding helper are out of scope; [`auth`] is a minimal shared-secret
//! guard standing in for the session layer those would otherwise provide.

pub mod accounts;
pub mod auth;
pub mod config;
