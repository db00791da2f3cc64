//! CodeWhisperer response stream handler (component C3, Amazon Q segment rules).
//!
//! Decodes the upstream AWS binary event-stream body via
//! [`llmrelay_framing::FrameDecoder`] and drives a [`Resequencer`] with the
//! Amazon-Q-specific splitting rules: a `toolUseId`+`name` frame opens a new
//! tool_use segment, plain `content` text coalesces into the current text
//! segment, a `stop: true` frame closes the open tool_use segment, and text
//! arriving after a closed tool segment opens a fresh text segment at the
//! next index.

use async_stream::stream;
use futures::StreamExt;
use llmrelay_core::events::{ProviderStreamEvent, StopReason, Usage};
use llmrelay_framing::{Frame, FrameDecoder, FramingError};
use llmrelay_providers::Resequencer;
use llmrelay_providers::provider::{ProviderError, ProviderEventStream};

/// Tracks which tool_use segment (if any) is currently open, so repeated
/// fragments for the same `toolUseId` append instead of re-opening.
#[derive(Default)]
struct FrameState {
    open_tool_use_id: Option<String>,
    text_bytes: usize,
}

/// Apply one decoded frame to the resequencer. Returns `Some(message)` if the
/// frame represents an upstream exception that should terminate the stream.
fn apply_frame(resequencer: &mut Resequencer, state: &mut FrameState, frame: &Frame) -> Option<String> {
    if frame.message_type.as_deref() == Some("exception") {
        let message = frame
            .payload
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("upstream exception")
            .to_string();
        return Some(message);
    }

    let tool_use_id = frame.payload.get("toolUseId").and_then(serde_json::Value::as_str);
    let name = frame.payload.get("name").and_then(serde_json::Value::as_str);
    let input_fragment = frame.payload.get("input").and_then(serde_json::Value::as_str);
    let stop = frame.payload.get("stop").and_then(serde_json::Value::as_bool).unwrap_or(false);
    let content = frame.payload.get("content").and_then(serde_json::Value::as_str);

    if let (Some(id), Some(name)) = (tool_use_id, name) {
        if state.open_tool_use_id.as_deref() != Some(id) {
            resequencer.open_tool_use(id, name);
            state.open_tool_use_id = Some(id.to_string());
        }
        if let Some(fragment) = input_fragment {
            if !fragment.is_empty() {
                resequencer.append_tool_input(fragment);
            }
        }
    } else if let (Some(id), Some(fragment)) = (tool_use_id, input_fragment) {
        if state.open_tool_use_id.as_deref() == Some(id) && !fragment.is_empty() {
            resequencer.append_tool_input(fragment);
        }
    }

    if stop && state.open_tool_use_id.is_some() {
        resequencer.close_open_segment();
        state.open_tool_use_id = None;
    }

    if let Some(text) = content {
        if !text.is_empty() {
            resequencer.append_text(text);
            state.text_bytes += text.len();
        }
    }

    None
}

/// Turn a CodeWhisperer `GenerateAssistantResponse` HTTP response into the
/// canonical Anthropic SSE event stream.
pub fn handle_codewhisperer_response(
    response: reqwest::Response,
    message_id: String,
    model: String,
    initial_usage: Usage,
) -> ProviderEventStream {
    let mut byte_stream = response.bytes_stream();

    let event_stream = stream! {
        let mut decoder = FrameDecoder::new();
        let mut resequencer = Resequencer::new();
        let mut state = FrameState::default();
        resequencer.message_start(message_id.clone(), model.clone(), initial_usage.clone());

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    resequencer.fail_mid_stream("api_error", &e.to_string());
                    for event in resequencer.into_events() {
                        yield Ok::<ProviderStreamEvent, ProviderError>(event);
                    }
                    return;
                }
            };

            let (frames, framing_error) = decoder.push(&bytes);

            for frame in &frames {
                if let Some(message) = apply_frame(&mut resequencer, &mut state, frame) {
                    resequencer.fail_mid_stream("api_error", &message);
                    for event in resequencer.into_events() {
                        yield Ok(event);
                    }
                    return;
                }
            }

            if let Some(err) = framing_error {
                resequencer.fail_mid_stream("api_error", &framing_error_message(&err));
                for event in resequencer.into_events() {
                    yield Ok(event);
                }
                return;
            }
        }

        let output_tokens = estimate_output_tokens(state.text_bytes);
        let final_usage = Usage {
            input_tokens: initial_usage.input_tokens,
            output_tokens: Some(output_tokens),
            cache_creation_input_tokens: initial_usage.cache_creation_input_tokens,
            cache_read_input_tokens: initial_usage.cache_read_input_tokens,
        };
        resequencer.finish(StopReason::EndTurn, final_usage);
        for event in resequencer.into_events() {
            yield Ok(event);
        }
    };

    Box::pin(event_stream)
}

fn framing_error_message(err: &FramingError) -> String {
    format!("malformed event-stream frame: {err}")
}

/// `chars/4` token estimate, floored at 1, matching the cache simulator's rule.
fn estimate_output_tokens(byte_len: usize) -> u32 {
    ((byte_len / 4).max(1)) as u32
}
