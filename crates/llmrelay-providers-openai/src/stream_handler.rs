//! OpenAI response stream handler (component C3, OpenAI segment rules).
//!
//! Drives a [`Resequencer`] from `choices[0].delta` chunks: `content` deltas
//! coalesce into the current text segment, `tool_calls[].function.arguments`
//! fragments append to the tool_use segment opened for that `tool_calls[]`
//! index, and `finish_reason` maps to the canonical stop reason via
//! [`StopReason::from_upstream`]. When thinking was requested on a channel
//! with no native thinking support, a literal `<thinking>…</thinking>`
//! prefix in the first text chunk is peeled back out into thinking deltas.

use llmrelay_core::events::{ProviderStreamEvent, StopReason, Usage};
use llmrelay_providers::Resequencer;
use llmrelay_providers::provider::ProviderEventStream;
use llmrelay_providers::sse::SseParserOptions;
use llmrelay_providers::stream_pipeline::sse_to_event_stream;

use crate::types::{ChatChunkChoice, ChatCompletionChunk, ChatToolCallDelta};

/// OpenAI's chunked stream always ends with an explicit `[DONE]` marker, so
/// there's nothing useful left in an unterminated trailing buffer.
static SSE_OPTIONS: SseParserOptions = SseParserOptions { process_remaining_buffer: false };

const THINKING_OPEN_TAG: &str = "<thinking>";
const THINKING_CLOSE_TAG: &str = "</thinking>";

#[derive(Debug, PartialEq, Eq)]
enum SniffState {
    Sniffing,
    InThinking,
    Done,
}

/// Peels a `<thinking>…</thinking>` prefix (if present) out of the first
/// text deltas into thinking segments, then forwards the rest as text.
struct ThinkingPrefixParser {
    enabled: bool,
    state: SniffState,
    buffer: String,
}

impl ThinkingPrefixParser {
    fn new(enabled: bool) -> Self {
        Self { enabled, state: if enabled { SniffState::Sniffing } else { SniffState::Done }, buffer: String::new() }
    }

    /// Route one text fragment through the sniffer, applying thinking/text
    /// segments to `resequencer` as the split becomes clear.
    fn feed(&mut self, resequencer: &mut Resequencer, fragment: &str) {
        if !self.enabled || self.state == SniffState::Done {
            if !fragment.is_empty() {
                resequencer.append_text(fragment);
            }
            return;
        }

        if self.state == SniffState::Sniffing {
            self.buffer.push_str(fragment);
            if self.buffer.len() < THINKING_OPEN_TAG.len() {
                if THINKING_OPEN_TAG.starts_with(&self.buffer) {
                    return;
                }
                self.flush_as_plain_text(resequencer);
                return;
            }
            if !self.buffer.starts_with(THINKING_OPEN_TAG) {
                self.flush_as_plain_text(resequencer);
                return;
            }
            let rest = self.buffer[THINKING_OPEN_TAG.len()..].to_string();
            self.buffer.clear();
            self.state = SniffState::InThinking;
            self.feed_in_thinking(resequencer, &rest);
            return;
        }

        self.feed_in_thinking(resequencer, fragment);
    }

    fn feed_in_thinking(&mut self, resequencer: &mut Resequencer, fragment: &str) {
        self.buffer.push_str(fragment);
        if let Some(close_at) = self.buffer.find(THINKING_CLOSE_TAG) {
            let thinking_text = self.buffer[..close_at].to_string();
            let remainder = self.buffer[close_at + THINKING_CLOSE_TAG.len()..].to_string();
            self.buffer.clear();
            if !thinking_text.is_empty() {
                resequencer.append_thinking(&thinking_text);
            }
            resequencer.close_open_segment();
            self.state = SniffState::Done;
            if !remainder.is_empty() {
                resequencer.append_text(&remainder);
            }
        }
    }

    fn flush_as_plain_text(&mut self, resequencer: &mut Resequencer) {
        let buffered = std::mem::take(&mut self.buffer);
        self.state = SniffState::Done;
        if !buffered.is_empty() {
            resequencer.append_text(&buffered);
        }
    }

    /// Called once the stream ends; whatever is still buffered is forwarded
    /// as plain text (an unterminated `<thinking>` block, or a sniff that
    /// never resolved).
    fn finish(&mut self, resequencer: &mut Resequencer) {
        match self.state {
            SniffState::Sniffing => self.flush_as_plain_text(resequencer),
            SniffState::InThinking => {
                let buffered = std::mem::take(&mut self.buffer);
                if !buffered.is_empty() {
                    resequencer.append_thinking(&buffered);
                }
                resequencer.close_open_segment();
                self.state = SniffState::Done;
            }
            SniffState::Done => {}
        }
    }
}

/// Tracks which OpenAI `tool_calls[].index` currently has an open segment.
#[derive(Default)]
struct ToolCallState {
    open_index: Option<usize>,
}

fn apply_tool_call_delta(resequencer: &mut Resequencer, state: &mut ToolCallState, delta: &ChatToolCallDelta) {
    if let (Some(id), Some(name)) =
        (delta.id.as_deref(), delta.function.as_ref().and_then(|f| f.name.as_deref()))
    {
        if state.open_index != Some(delta.index) {
            resequencer.open_tool_use(id, name);
            state.open_index = Some(delta.index);
        }
    }

    if state.open_index == Some(delta.index) {
        if let Some(arguments) = delta.function.as_ref().and_then(|f| f.arguments.as_deref()) {
            if !arguments.is_empty() {
                resequencer.append_tool_input(arguments);
            }
        }
    }
}

fn apply_choice(
    resequencer: &mut Resequencer,
    sniffer: &mut ThinkingPrefixParser,
    tool_state: &mut ToolCallState,
    choice: &ChatChunkChoice,
) -> Option<StopReason> {
    if let Some(content) = &choice.delta.content {
        sniffer.feed(resequencer, content);
    }
    if let Some(tool_calls) = &choice.delta.tool_calls {
        for delta in tool_calls {
            apply_tool_call_delta(resequencer, tool_state, delta);
        }
    }
    choice.finish_reason.as_deref().map(StopReason::from_upstream)
}

/// Per-stream state threaded through [`apply_chunk`] by [`sse_to_event_stream`].
struct OpenAiStreamState {
    resequencer: Resequencer,
    sniffer: ThinkingPrefixParser,
    tool_state: ToolCallState,
    usage: Usage,
}

/// Apply one decoded `ChatCompletionChunk` to the stream state, returning the
/// canonical events it produced. Closes out the resequencer as soon as a
/// `finish_reason` appears — OpenAI never sends content after that chunk.
fn apply_chunk(chunk: &ChatCompletionChunk, state: &mut OpenAiStreamState) -> Vec<ProviderStreamEvent> {
    if let Some(usage) = &chunk.usage {
        state.usage.input_tokens = Some(usage.prompt_tokens);
        state.usage.output_tokens = Some(usage.completion_tokens);
    }

    let mut finish_reason = None;
    for choice in &chunk.choices {
        if let Some(reason) = apply_choice(&mut state.resequencer, &mut state.sniffer, &mut state.tool_state, choice) {
            finish_reason = Some(reason);
        }
    }

    if let Some(reason) = finish_reason {
        state.sniffer.finish(&mut state.resequencer);
        state.resequencer.finish(reason, state.usage.clone());
    }

    state.resequencer.drain_events()
}

/// Turn an OpenAI `/v1/chat/completions` SSE response into the canonical
/// Anthropic SSE event stream.
pub fn handle_openai_response(
    response: reqwest::Response,
    message_id: String,
    model: String,
    initial_usage: Usage,
    thinking_enabled: bool,
) -> ProviderEventStream {
    let mut resequencer = Resequencer::new();
    resequencer.message_start(message_id, model, initial_usage.clone());

    let state = OpenAiStreamState {
        resequencer,
        sniffer: ThinkingPrefixParser::new(thinking_enabled),
        tool_state: ToolCallState::default(),
        usage: initial_usage,
    };

    sse_to_event_stream::<ChatCompletionChunk, _, _>(response, &SSE_OPTIONS, state, apply_chunk)
}
