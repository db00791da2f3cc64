//! Client-facing `/v1` routes: the Anthropic-Messages-compatible surface.

pub mod messages;
pub mod models;
