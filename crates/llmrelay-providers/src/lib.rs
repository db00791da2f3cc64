//! # llmrelay-providers
//!
//! Provider-agnostic streaming plumbing shared by the three channel crates
//! (`llmrelay-providers-anthropic`, `llmrelay-providers-google`,
//! `llmrelay-providers-openai`):
//!
//! - [`provider`]: the [`ProviderError`] taxonomy every channel's request
//!   builder and stream handler return.
//! - [`sse`]: a generic Server-Sent-Events line parser.
//! - [`stream_pipeline`]: the `bytes_stream -> SSE lines -> typed events ->
//!   ProviderStreamEvent` boilerplate, factored out so each channel only
//!   supplies its own per-event handler.
//! - [`tool_parsing`]: fails-open JSON parsing for streamed tool-call arguments.
//! - [`error_parsing`]: shared upstream error-envelope parsing.
//! - [`cache`]: the prompt-cache simulator (component C4).
//! - [`resequencer`]: the canonical Anthropic SSE event builder (component C3).

#![deny(unsafe_code)]

pub mod cache;
pub mod error_parsing;
pub mod provider;
pub mod resequencer;
pub mod sse;
pub mod stream_pipeline;
pub mod tool_parsing;

pub use cache::{CacheAccounting, CacheStats, PromptCacheSimulator, extract_cacheable_text};
pub use provider::{ProviderError, ProviderEventStream, ProviderResult};
pub use resequencer::Resequencer;
pub use tool_parsing::{ToolCallContext, parse_tool_call_arguments};
