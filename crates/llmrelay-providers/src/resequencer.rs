//! Canonical Anthropic SSE event builder (component C3).
//!
//! Each channel's stream handler drives a [`Resequencer`] as it parses
//! provider-native events (Amazon Q decoded frames, Gemini SSE JSON lines,
//! `OpenAI` SSE JSON lines). The resequencer is the single place that knows
//! how to open/close content-block segments with strictly monotonic indices
//! and assemble the `message_start -> content_block_* -> message_delta ->
//! message_stop` sequence; channels never construct [`ProviderStreamEvent`]s
//! directly.

use llmrelay_core::events::{
    ContentBlockDelta, ContentBlockStart, MessageDeltaPayload, MessageStartEnvelope,
    ProviderStreamEvent, StopReason, StreamErrorPayload, Usage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpenKind {
    Text,
    Thinking,
    ToolUse,
}

/// Builds one well-formed canonical event sequence for a single response.
pub struct Resequencer {
    next_index: u32,
    open: Option<OpenKind>,
    events: Vec<ProviderStreamEvent>,
    started: bool,
    finished: bool,
}

impl Default for Resequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Resequencer {
    /// A fresh resequencer with no events emitted yet.
    #[must_use]
    pub fn new() -> Self {
        Self { next_index: 0, open: None, events: Vec::new(), started: false, finished: false }
    }

    /// Emit `message_start`. Must be called at most once, before any segment
    /// is opened.
    pub fn message_start(&mut self, id: String, model: String, usage: Usage) {
        debug_assert!(!self.started, "message_start emitted twice");
        self.started = true;
        self.events.push(ProviderStreamEvent::MessageStart {
            message: MessageStartEnvelope {
                id,
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model,
                content: Vec::new(),
                stop_reason: None,
                usage,
            },
        });
    }

    /// Close whatever segment is currently open, if any. Idempotent.
    pub fn close_open_segment(&mut self) {
        if self.open.take().is_some() {
            self.events.push(ProviderStreamEvent::ContentBlockStop { index: self.next_index - 1 });
        }
    }

    fn open_segment(&mut self, kind: OpenKind, content_block: ContentBlockStart) -> u32 {
        self.close_open_segment();
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some(kind);
        self.events.push(ProviderStreamEvent::ContentBlockStart { index, content_block });
        index
    }

    /// Open a new text segment, closing whatever was open before it.
    pub fn open_text(&mut self) -> u32 {
        self.open_segment(OpenKind::Text, ContentBlockStart::Text { text: String::new() })
    }

    /// Append a text delta to the currently open text segment. Opens one
    /// first if none is open (so callers can coalesce without tracking
    /// "did I already open this segment" themselves).
    pub fn append_text(&mut self, text: &str) {
        if self.open != Some(OpenKind::Text) {
            self.open_text();
        }
        let index = self.next_index - 1;
        self.events.push(ProviderStreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta { text: text.to_string() },
        });
    }

    /// Open a new thinking segment.
    pub fn open_thinking(&mut self) -> u32 {
        self.open_segment(OpenKind::Thinking, ContentBlockStart::Thinking { thinking: String::new() })
    }

    /// Append a thinking delta, opening a thinking segment first if needed.
    pub fn append_thinking(&mut self, text: &str) {
        if self.open != Some(OpenKind::Thinking) {
            self.open_thinking();
        }
        let index = self.next_index - 1;
        self.events.push(ProviderStreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::ThinkingDelta { thinking: text.to_string() },
        });
    }

    /// Emit the closing `signature_delta` for the open thinking segment, then
    /// close it. No-op if no thinking segment is open.
    pub fn close_thinking_with_signature(&mut self, signature: &str) {
        if self.open != Some(OpenKind::Thinking) {
            return;
        }
        let index = self.next_index - 1;
        self.events.push(ProviderStreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::SignatureDelta { signature: signature.to_string() },
        });
        self.close_open_segment();
    }

    /// Open a new tool_use segment with an empty `input` object.
    pub fn open_tool_use(&mut self, id: &str, name: &str) -> u32 {
        self.open_segment(
            OpenKind::ToolUse,
            ContentBlockStart::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: serde_json::json!({}),
            },
        )
    }

    /// Append a raw JSON fragment to the currently open tool_use segment's
    /// `input`. Panics in debug builds if no tool_use segment is open —
    /// callers must open one explicitly since, unlike text/thinking, a
    /// tool_use segment always carries an id and name up front.
    pub fn append_tool_input(&mut self, partial_json: &str) {
        debug_assert_eq!(self.open, Some(OpenKind::ToolUse), "append_tool_input with no open tool_use segment");
        let index = self.next_index - 1;
        self.events.push(ProviderStreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::InputJsonDelta { partial_json: partial_json.to_string() },
        });
    }

    /// Interleave a `ping` keep-alive event.
    pub fn ping(&mut self) {
        self.events.push(ProviderStreamEvent::Ping);
    }

    /// Close any open segment, emit `message_delta` with `stop_reason` and
    /// final `usage`, then `message_stop`. Terminal: no further events may be
    /// pushed after this.
    pub fn finish(&mut self, stop_reason: StopReason, usage: Usage) {
        self.close_open_segment();
        self.events.push(ProviderStreamEvent::MessageDelta {
            delta: MessageDeltaPayload { stop_reason, stop_sequence: None },
            usage,
        });
        self.events.push(ProviderStreamEvent::MessageStop);
        self.finished = true;
    }

    /// A parser error occurred before `message_start` was ever emitted.
    /// Discards anything buffered and produces only the `error` event.
    pub fn abort_before_start(self, kind: &str, message: &str) -> Vec<ProviderStreamEvent> {
        debug_assert!(!self.started, "abort_before_start called after message_start");
        vec![ProviderStreamEvent::Error { error: StreamErrorPayload { kind: kind.to_string(), message: message.to_string() } }]
    }

    /// A parser error occurred mid-stream, after `message_start`. Closes any
    /// open segment, emits `error`, then `message_stop`.
    pub fn fail_mid_stream(&mut self, kind: &str, message: &str) {
        self.close_open_segment();
        self.events.push(ProviderStreamEvent::Error { error: StreamErrorPayload { kind: kind.to_string(), message: message.to_string() } });
        self.events.push(ProviderStreamEvent::MessageStop);
        self.finished = true;
    }

    /// Whether [`finish`](Self::finish) or [`fail_mid_stream`](Self::fail_mid_stream) has run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the accumulated event sequence.
    #[must_use]
    pub fn into_events(self) -> Vec<ProviderStreamEvent> {
        self.events
    }

    /// Drain only the events produced since the last call, leaving the
    /// resequencer otherwise intact. Lets a per-line handler callback
    /// (e.g. the one [`crate::stream_pipeline::sse_to_event_stream`]
    /// expects) emit incrementally instead of buffering a whole response.
    pub fn drain_events(&mut self) -> Vec<ProviderStreamEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage() -> Usage {
        Usage { input_tokens: Some(10), output_tokens: Some(5), cache_creation_input_tokens: None, cache_read_input_tokens: None }
    }

    #[test]
    fn simple_text_turn_sequence() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "claude-sonnet-4-5".into(), usage());
        r.append_text("hel");
        r.append_text("lo");
        r.finish(StopReason::EndTurn, usage());
        let events = r.into_events();

        assert!(matches!(events[0], ProviderStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], ProviderStreamEvent::ContentBlockStart { index: 0, .. }));
        assert_eq!(events.len(), 7); // start, block_start, delta, delta, block_stop, message_delta, message_stop
    }

    #[test]
    fn text_then_tool_use_gets_distinct_monotonic_indices() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.append_text("thinking out loud");
        r.open_tool_use("toolu_1", "Bash");
        r.append_tool_input("{\"cmd\"");
        r.append_tool_input(":\"ls\"}");
        r.finish(StopReason::ToolUse, usage());
        let events = r.into_events();

        let starts: Vec<u32> = events
            .iter()
            .filter_map(|e| if let ProviderStreamEvent::ContentBlockStart { index, .. } = e { Some(*index) } else { None })
            .collect();
        assert_eq!(starts, vec![0, 1]);

        let stops: Vec<u32> = events
            .iter()
            .filter_map(|e| if let ProviderStreamEvent::ContentBlockStop { index } = e { Some(*index) } else { None })
            .collect();
        assert_eq!(stops, vec![0, 1]);
    }

    #[test]
    fn thinking_segment_closes_with_signature_delta() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.append_thinking("pondering");
        r.close_thinking_with_signature("sig-abc");
        r.finish(StopReason::EndTurn, usage());
        let events = r.into_events();

        let has_signature = events.iter().any(|e| {
            matches!(e, ProviderStreamEvent::ContentBlockDelta { delta: ContentBlockDelta::SignatureDelta { signature }, .. } if signature == "sig-abc")
        });
        assert!(has_signature);
    }

    #[test]
    fn reopening_text_after_tool_use_gets_a_fresh_index() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.open_tool_use("toolu_1", "Bash");
        r.append_tool_input("{}");
        r.append_text("back to prose");
        r.finish(StopReason::EndTurn, usage());
        let events = r.into_events();

        let starts: Vec<u32> = events
            .iter()
            .filter_map(|e| if let ProviderStreamEvent::ContentBlockStart { index, .. } = e { Some(*index) } else { None })
            .collect();
        assert_eq!(starts, vec![0, 1]);
    }

    #[test]
    fn finish_emits_stop_reason_and_terminal_message_stop() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.append_text("hi");
        r.finish(StopReason::MaxTokens, usage());
        let events = r.into_events();
        assert!(matches!(events.last(), Some(ProviderStreamEvent::MessageStop)));
        let delta = events.iter().find_map(|e| if let ProviderStreamEvent::MessageDelta { delta, .. } = e { Some(delta) } else { None }).unwrap();
        assert_eq!(delta.stop_reason, StopReason::MaxTokens);
        assert!(delta.stop_sequence.is_none());
    }

    #[test]
    fn abort_before_start_yields_only_error_event() {
        let r = Resequencer::new();
        let events = r.abort_before_start("api_error", "upstream unreachable");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProviderStreamEvent::Error { error } if error.message == "upstream unreachable"));
    }

    #[test]
    fn fail_mid_stream_closes_open_segment_then_errors_then_stops() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.append_text("partial");
        r.fail_mid_stream("overloaded_error", "upstream dropped connection");
        let events = r.into_events();
        assert!(matches!(events[events.len() - 3], ProviderStreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[events.len() - 2], ProviderStreamEvent::Error { .. }));
        assert!(matches!(events[events.len() - 1], ProviderStreamEvent::MessageStop));
    }

    #[test]
    fn ping_can_be_interleaved() {
        let mut r = Resequencer::new();
        r.message_start("msg_1".into(), "m".into(), usage());
        r.append_text("hi");
        r.ping();
        r.append_text(" there");
        r.finish(StopReason::EndTurn, usage());
        let events = r.into_events();
        assert!(events.iter().any(|e| matches!(e, ProviderStreamEvent::Ping)));
    }
}
