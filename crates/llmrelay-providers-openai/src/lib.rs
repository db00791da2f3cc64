//! # llmrelay-providers-openai
//!
//! The Claude -> OpenAI channel and the Claude pass-through channel
//! (component C2.3/C3), covering both halves of the `custom_api` account
//! kind:
//!
//! - [`types`] — OpenAI `/v1/chat/completions` wire types and the reserved-billing-string filter
//! - [`request_builder`] — Build an OpenAI chat-completions request from a canonical Claude request
//! - [`stream_handler`] — Decode OpenAI's SSE stream into canonical Anthropic SSE events
//! - [`claude_passthrough`] — Forward a `claude`-format custom API's request/response verbatim
//!
//! Unlike CodeWhisperer and Gemini, this channel has no single fixed
//! upstream — `other.format` on the selected account picks between an
//! OpenAI-compatible endpoint and a Claude-compatible one at request time.

#![deny(unsafe_code)]

pub mod claude_passthrough;
pub mod request_builder;
pub mod stream_handler;
pub mod types;

pub use claude_passthrough::{build_claude_passthrough_request, handle_claude_passthrough_response};
pub use request_builder::build_openai_chat_request;
pub use stream_handler::handle_openai_response;
