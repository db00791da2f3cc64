//! # llmrelay-providers-anthropic
//!
//! The Claude -> Amazon Q CodeWhisperer channel (component C2.1/C3):
//!
//! - [`types`] — CodeWhisperer wire types and the Claude -> Amazon Q model-mapping table
//! - [`request_builder`] — Flatten a canonical Claude request into a `GenerateAssistantResponse` body
//! - [`stream_handler`] — Decode the CodeWhisperer event-stream body into canonical Anthropic SSE events
//!
//! CodeWhisperer has no native multi-turn wire shape for system prompts, tool
//! documentation, or anti-injection guidance, so all of that is flattened
//! into the single `content` string of the current turn, delimited by the
//! markers documented on [`request_builder::build_codewhisperer_request`].

#![deny(unsafe_code)]

pub mod request_builder;
pub mod stream_handler;
pub mod types;

pub use request_builder::build_codewhisperer_request;
pub use stream_handler::handle_codewhisperer_response;
pub use types::{CodeWhispererRequest, map_model_to_codewhisperer};
