//! # llmrelay-server
//!
//! Axum HTTP surface (C10): the client-facing Anthropic-Messages-compatible
//! endpoints and the `/v2` account-admin API.
//!
//! - [`server`] — `AppState`, router construction, bind + graceful shutdown
//! - [`routes`] — `/v1/messages` and its channel-pinned siblings, `/v1/models`
//! - [`admin`] — `/v2/accounts`, `/v2/config`, and the session-token guard
//! - [`health`] — `GET /health`
//! - [`shutdown`] — `CancellationToken`-based graceful shutdown coordination

#![deny(unsafe_code)]

pub mod admin;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
