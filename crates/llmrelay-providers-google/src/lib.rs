//! # llmrelay-providers-google
//!
//! The Claude -> Gemini channel (component C2.2/C3):
//!
//! - [`types`] — Gemini wire types and the Claude -> Gemini model-mapping table
//! - [`request_builder`] — Build a `streamGenerateContent` request envelope from a canonical Claude request
//! - [`stream_handler`] — Decode Gemini's SSE stream into canonical Anthropic SSE events

#![deny(unsafe_code)]

pub mod request_builder;
pub mod stream_handler;
pub mod types;

pub use request_builder::build_gemini_request;
pub use stream_handler::handle_gemini_response;
pub use types::map_model_to_gemini;
