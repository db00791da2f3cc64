//! Claude pass-through channel (component C2.3, wire-format `claude`).
//!
//! The request is forwarded to `{api_base}/v1/messages` verbatim — no
//! translation needed, since [`CanonicalClaudeRequest`] already mirrors the
//! Anthropic wire shape byte-for-byte. The response stream is likewise
//! relayed unchanged; [`ProviderStreamEvent`] deserializes directly off the
//! upstream SSE `data:` lines because it *is* that wire shape, so parsing
//! each event and re-emitting it is enough to extract usage for C9 without
//! altering a single byte of the re-serialized sequence.

use llmrelay_core::events::ProviderStreamEvent;
use llmrelay_core::request::CanonicalClaudeRequest;
use llmrelay_providers::provider::ProviderEventStream;
use llmrelay_providers::sse::SseParserOptions;
use llmrelay_providers::stream_pipeline::sse_to_event_stream;
use serde_json::Value;

static SSE_OPTIONS: SseParserOptions = SseParserOptions { process_remaining_buffer: false };

/// Serialize a canonical request as the verbatim body to POST to
/// `{api_base}/v1/messages`.
#[must_use]
pub fn build_claude_passthrough_request(req: &CanonicalClaudeRequest) -> Value {
    serde_json::to_value(req).unwrap_or_else(|_| Value::Null)
}

/// Relay an upstream Claude `/v1/messages` SSE response unchanged. Each event
/// deserializes directly as [`ProviderStreamEvent`] since that *is* the wire
/// shape, so the handler only needs to echo it back.
pub fn handle_claude_passthrough_response(response: reqwest::Response) -> ProviderEventStream {
    sse_to_event_stream::<ProviderStreamEvent, _, _>(response, &SSE_OPTIONS, (), |event, ()| vec![event.clone()])
}
