//! The canonical internal stream-event schema, mirroring Anthropic's SSE events.
//!
//! Every provider translator (`llmrelay-providers-*`) produces a stream of
//! [`ProviderStreamEvent`]; the re-serializer in `llmrelay-providers` turns
//! that into the wire-format Anthropic SSE sequence. This is the single pivot
//! point referenced by component C3.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Usage accounting carried on `message_start` and `message_delta`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt (provider-reported or estimated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    /// Tokens generated so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    /// Simulated cache-creation tokens (see the prompt-cache simulator).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    /// Simulated cache-read tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

/// The content-block variant opened by a `content_block_start` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlockStart {
    /// Plain text segment.
    #[serde(rename = "text")]
    Text {
        /// Initial text, usually empty.
        #[serde(default)]
        text: String,
    },
    /// Extended-thinking segment.
    #[serde(rename = "thinking")]
    Thinking {
        /// Initial thinking text, usually empty.
        #[serde(default)]
        thinking: String,
    },
    /// Tool-invocation segment.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Always an empty object at start; populated incrementally via deltas.
        input: Value,
    },
}

/// A single delta applied to the currently open content block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlockDelta {
    /// Incremental text for a text segment.
    #[serde(rename = "text_delta")]
    TextDelta {
        /// The text chunk.
        text: String,
    },
    /// Incremental JSON fragment for a tool-use segment's `input`. The
    /// concatenation of all fragments for one segment is valid JSON.
    #[serde(rename = "input_json_delta")]
    InputJsonDelta {
        /// Raw JSON fragment.
        partial_json: String,
    },
    /// Incremental thinking text.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta {
        /// The thinking chunk.
        thinking: String,
    },
    /// The final signature closing a thinking segment.
    #[serde(rename = "signature_delta")]
    SignatureDelta {
        /// Opaque provider signature.
        signature: String,
    },
}

/// Why the model stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Stopped to let the client execute a tool call.
    ToolUse,
    /// Hit `max_tokens`.
    MaxTokens,
    /// Hit a configured stop sequence.
    StopSequence,
}

impl StopReason {
    /// Map an upstream finish-reason string (provider-specific) onto the
    /// canonical set, defaulting to `end_turn` for anything unrecognized.
    #[must_use]
    pub fn from_upstream(raw: &str) -> Self {
        match raw {
            "tool_use" | "tool_calls" => Self::ToolUse,
            "max_tokens" | "length" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }
}

/// An Anthropic-shaped error payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorPayload {
    /// Error kind, e.g. `"api_error"`, `"overloaded_error"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// The canonical internal SSE event, one variant per Anthropic event type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderStreamEvent {
    /// Opens the message; carries initial usage (including simulated cache accounting).
    #[serde(rename = "message_start")]
    MessageStart {
        /// Anthropic-style message envelope (id, role, model, empty content, usage).
        message: MessageStartEnvelope,
    },
    /// Opens a content block at `index`.
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        /// Monotonically increasing index starting at 0.
        index: u32,
        /// The block being opened.
        content_block: ContentBlockStart,
    },
    /// Appends to the content block at `index`.
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        /// Index of the open block this delta applies to.
        index: u32,
        /// The delta payload.
        delta: ContentBlockDelta,
    },
    /// Closes the content block at `index`.
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {
        /// Index of the block being closed.
        index: u32,
    },
    /// Carries the final stop reason and cumulative usage.
    #[serde(rename = "message_delta")]
    MessageDelta {
        /// Stop reason and (always null here) stop sequence.
        delta: MessageDeltaPayload,
        /// Cumulative usage at message end.
        usage: Usage,
    },
    /// Closes the message. Terminal; no further events may follow.
    #[serde(rename = "message_stop")]
    MessageStop,
    /// Keep-alive; MAY be interleaved at most once every 15s.
    #[serde(rename = "ping")]
    Ping,
    /// A fatal error. If before `message_start`, aborts the stream entirely;
    /// mid-stream, all open blocks are closed and `message_stop` follows.
    #[serde(rename = "error")]
    Error {
        /// The error payload.
        error: StreamErrorPayload,
    },
}

/// The `message` object carried on `message_start`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageStartEnvelope {
    /// Opaque message id.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Always `"assistant"`.
    pub role: String,
    /// Model id (post provider-mapping).
    pub model: String,
    /// Always empty at `message_start`; content streams in via content-block events.
    pub content: Vec<Value>,
    /// `null` until `message_delta`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Initial usage snapshot.
    pub usage: Usage,
}

/// Payload of `message_delta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Always `null`; Non-goal to reproduce stop-sequence echoing.
    pub stop_sequence: Option<String>,
}

impl ProviderStreamEvent {
    /// Returns `true` for the terminal event after which no further events
    /// may appear in a well-formed sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop)
    }
}
