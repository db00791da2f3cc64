//! Gemini response stream handler (component C3, Gemini segment rules).
//!
//! Drives a [`Resequencer`] from successive `GeminiStreamChunk`s parsed off
//! `candidates[0].content.parts` — `thought:true` parts are thinking
//! segments, `functionCall` parts are complete tool_use segments (Gemini
//! delivers arguments atomically, never incrementally), and plain text
//! parts coalesce into the current text segment.

use async_stream::stream;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use llmrelay_core::events::{ProviderStreamEvent, StopReason, Usage};
use llmrelay_providers::Resequencer;
use llmrelay_providers::provider::{ProviderError, ProviderEventStream};

use crate::types::{GeminiPart, GeminiStreamChunk};

/// Generates unique tool-call ids, since Gemini's wire format doesn't supply one.
struct ToolCallIdAllocator {
    prefix: String,
    next: u32,
}

impl ToolCallIdAllocator {
    fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string(), next: 0 }
    }

    fn next_id(&mut self) -> String {
        let id = format!("call_{}_{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Apply one decoded chunk to the resequencer. Returns `Some(message)` if
/// the chunk carries an upstream API error that should terminate the stream.
fn apply_chunk(resequencer: &mut Resequencer, ids: &mut ToolCallIdAllocator, chunk: &GeminiStreamChunk) -> Option<String> {
    if let Some(error) = &chunk.error {
        return Some(format!("Gemini API error ({}): {}", error.code, error.message));
    }

    let Some(candidates) = &chunk.candidates else { return None };
    let Some(candidate) = candidates.first() else { return None };

    if let Some(content) = &candidate.content {
        for part in &content.parts {
            apply_part(resequencer, ids, part);
        }
    }

    None
}

fn apply_part(resequencer: &mut Resequencer, ids: &mut ToolCallIdAllocator, part: &GeminiPart) {
    match part {
        GeminiPart::Text { text, thought, thought_signature } => {
            if *thought == Some(true) {
                if !text.is_empty() {
                    resequencer.append_thinking(text);
                }
                if let Some(signature) = thought_signature {
                    resequencer.close_thinking_with_signature(signature);
                }
            } else if !text.is_empty() {
                resequencer.append_text(text);
            }
        }
        GeminiPart::FunctionCall { function_call, .. } => {
            let id = ids.next_id();
            let args_json = serde_json::to_string(&function_call.args).unwrap_or_else(|_| "{}".to_string());
            resequencer.open_tool_use(&id, &function_call.name);
            resequencer.append_tool_input(&args_json);
            resequencer.close_open_segment();
        }
        GeminiPart::FunctionResponse { .. } | GeminiPart::InlineData { .. } => {}
    }
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        "TOOL_USE" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Turn a Gemini `streamGenerateContent?alt=sse` HTTP response into the
/// canonical Anthropic SSE event stream.
///
/// An empty response body (`Content-Length: 0`, per the empty-quota edge
/// case) surfaces as a complete but empty sequence rather than an error.
pub fn handle_gemini_response(
    response: reqwest::Response,
    message_id: String,
    model: String,
    initial_usage: Usage,
) -> ProviderEventStream {
    let mut sse_stream = response.bytes_stream().eventsource();

    let event_stream = stream! {
        let mut resequencer = Resequencer::new();
        let mut ids = ToolCallIdAllocator::new(&message_id);
        resequencer.message_start(message_id.clone(), model.clone(), initial_usage.clone());

        let mut final_usage = initial_usage.clone();
        let mut finish_reason: Option<StopReason> = None;
        let mut saw_any_event = false;

        while let Some(event) = sse_stream.next().await {
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    resequencer.fail_mid_stream("api_error", &e.to_string());
                    for event in resequencer.into_events() {
                        yield Ok::<ProviderStreamEvent, ProviderError>(event);
                    }
                    return;
                }
            };
            if event.data.is_empty() {
                continue;
            }
            saw_any_event = true;

            let chunk: GeminiStreamChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(e) => {
                    resequencer.fail_mid_stream("api_error", &format!("malformed Gemini event: {e}"));
                    for event in resequencer.into_events() {
                        yield Ok(event);
                    }
                    return;
                }
            };

            if let Some(usage) = &chunk.usage_metadata {
                final_usage = Usage {
                    input_tokens: Some(usage.prompt_token_count),
                    output_tokens: Some(usage.candidates_token_count),
                    cache_creation_input_tokens: initial_usage.cache_creation_input_tokens,
                    cache_read_input_tokens: initial_usage.cache_read_input_tokens,
                };
            }

            if let Some(message) = apply_chunk(&mut resequencer, &mut ids, &chunk) {
                resequencer.fail_mid_stream("api_error", &message);
                for event in resequencer.into_events() {
                    yield Ok(event);
                }
                return;
            }

            if let Some(candidates) = &chunk.candidates {
                if let Some(reason) = candidates.first().and_then(|c| c.finish_reason.as_deref()) {
                    finish_reason = Some(map_finish_reason(reason));
                }
            }
        }

        if !saw_any_event {
            resequencer.open_text();
        }

        resequencer.finish(finish_reason.unwrap_or(StopReason::EndTurn), final_usage);
        for event in resequencer.into_events() {
            yield Ok(event);
        }
    };

    Box::pin(event_stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionCallData, GeminiApiError, GeminiCandidate, GeminiCandidateContent};
    use serde_json::json;

    fn zero_usage() -> Usage {
        Usage { input_tokens: None, output_tokens: None, cache_creation_input_tokens: None, cache_read_input_tokens: None }
    }

    fn chunk_with_parts(parts: Vec<GeminiPart>, finish_reason: Option<&str>) -> GeminiStreamChunk {
        GeminiStreamChunk {
            candidates: Some(vec![GeminiCandidate {
                content: Some(GeminiCandidateContent { parts, role: Some("model".into()) }),
                finish_reason: finish_reason.map(String::from),
                safety_ratings: None,
            }]),
            usage_metadata: None,
            error: None,
        }
    }

    #[test]
    fn thought_part_opens_a_thinking_segment() {
        let mut r = Resequencer::new();
        let mut ids = ToolCallIdAllocator::new("msg1");
        r.message_start("msg1".into(), "m".into(), zero_usage());

        let chunk = chunk_with_parts(
            vec![GeminiPart::Text { text: "reasoning".into(), thought: Some(true), thought_signature: Some("sig".into()) }],
            None,
        );
        assert!(apply_chunk(&mut r, &mut ids, &chunk).is_none());
        r.finish(StopReason::EndTurn, zero_usage());
        let events = r.into_events();
        assert!(events.iter().any(|e| matches!(e, ProviderStreamEvent::ContentBlockStart { content_block: llmrelay_core::events::ContentBlockStart::Thinking { .. }, .. })));
    }

    #[test]
    fn function_call_part_is_a_self_closing_tool_use_segment() {
        let mut r = Resequencer::new();
        let mut ids = ToolCallIdAllocator::new("msg1");
        r.message_start("msg1".into(), "m".into(), zero_usage());

        let chunk = chunk_with_parts(
            vec![GeminiPart::FunctionCall { function_call: FunctionCallData { name: "bash".into(), args: json!({"cmd": "ls"}) }, thought_signature: None }],
            None,
        );
        apply_chunk(&mut r, &mut ids, &chunk);
        r.finish(StopReason::ToolUse, zero_usage());
        let events = r.into_events();
        let stops = events.iter().filter(|e| matches!(e, ProviderStreamEvent::ContentBlockStop { .. })).count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn api_error_chunk_reports_a_terminating_message() {
        let mut r = Resequencer::new();
        let mut ids = ToolCallIdAllocator::new("msg1");
        r.message_start("msg1".into(), "m".into(), zero_usage());

        let chunk = GeminiStreamChunk { candidates: None, usage_metadata: None, error: Some(GeminiApiError { code: 429, message: "rate limited".into() }) };
        let message = apply_chunk(&mut r, &mut ids, &chunk);
        assert_eq!(message.as_deref(), Some("Gemini API error (429): rate limited"));
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("STOP"), StopReason::EndTurn);
        assert_eq!(map_finish_reason("MAX_TOKENS"), StopReason::MaxTokens);
        assert_eq!(map_finish_reason("TOOL_USE"), StopReason::ToolUse);
        assert_eq!(map_finish_reason("SAFETY"), StopReason::EndTurn);
    }

    #[test]
    fn tool_call_ids_are_unique_per_allocator() {
        let mut ids = ToolCallIdAllocator::new("abc");
        assert_eq!(ids.next_id(), "call_abc_0");
        assert_eq!(ids.next_id(), "call_abc_1");
    }
}
