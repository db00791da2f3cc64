//! OpenAI `/v1/chat/completions` wire types, shared by both the OpenAI
//! translator and the Claude pass-through channel's request-building side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Billing/identity strings that must never leak into a third-party request
/// body — stripped from flattened system/text content before forwarding.
const RESERVED_BILLING_STRINGS: &[&str] = &["anthropic-version", "anthropic-beta", "x-api-key", "cache_control"];

/// Strip any reserved Anthropic billing-header substrings from `text`.
#[must_use]
pub fn strip_reserved_billing_strings(text: &str) -> String {
    let mut out = text.to_string();
    for needle in RESERVED_BILLING_STRINGS {
        out = out.replace(needle, "");
    }
    out
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ChatContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlPayload },
}

#[derive(Clone, Debug, Serialize)]
pub struct ImageUrlPayload {
    pub url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunctionCall,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ChatFunctionDefinition,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatFunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ── Streaming response types ───────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChatFunctionCallDelta>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatFunctionCallDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_strings_are_stripped() {
        let text = "please set anthropic-version: 2023-06-01 and x-api-key here";
        let stripped = strip_reserved_billing_strings(text);
        assert!(!stripped.contains("anthropic-version"));
        assert!(!stripped.contains("x-api-key"));
    }

    #[test]
    fn ordinary_text_is_unaffected() {
        let text = "hello, world";
        assert_eq!(strip_reserved_billing_strings(text), text);
    }

    #[test]
    fn chat_content_text_serializes_as_bare_string() {
        let content = ChatContent::Text("hi".into());
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value, serde_json::json!("hi"));
    }
}
