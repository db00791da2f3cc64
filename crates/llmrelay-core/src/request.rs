//! The canonical Claude (Anthropic Messages API) request shape.
//!
//! Every client request — regardless of which provider channel it is
//! ultimately routed to — is parsed into [`CanonicalClaudeRequest`] first.
//! Provider request builders in `llmrelay-providers*` consume this type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{MessageContent, SystemPrompt};

/// One entry of `messages`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaudeMessage {
    /// `user` or `assistant`.
    pub role: Role,
    /// Message content: a bare string or an ordered list of content blocks.
    pub content: MessageContent,
}

/// Message role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// Extended-thinking request toggle. Anthropic accepts either a bare bool or
/// `{"type": "enabled"|"disabled", "budget_tokens": N}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThinkingConfig {
    /// Bare boolean toggle.
    Bool(bool),
    /// Structured form with an explicit budget.
    Structured {
        /// `"enabled"` or `"disabled"`.
        #[serde(rename = "type")]
        kind: String,
        /// Token budget for thinking output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        budget_tokens: Option<u32>,
    },
}

impl ThinkingConfig {
    /// Resolve whether thinking is enabled under this config.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Structured { kind, .. } => kind == "enabled",
        }
    }

    /// The requested thinking token budget, if any.
    #[must_use]
    pub fn budget_tokens(&self) -> Option<u32> {
        match self {
            Self::Bool(_) => None,
            Self::Structured { budget_tokens, .. } => *budget_tokens,
        }
    }
}

/// A tool definition as supplied by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description; may be arbitrarily long (CodeWhisperer
    /// truncates past 10,240 chars, see `llmrelay-providers-*` builders).
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: Value,
}

/// The full client-facing request body for `/v1/messages` and its channel-pinned variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalClaudeRequest {
    /// Requested model id (subject to per-channel mapping).
    pub model: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// System prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Conversation history, oldest first.
    pub messages: Vec<ClaudeMessage>,
    /// Tool definitions available to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool-choice directive, passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Extended-thinking configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    /// `true` if the client wants an event stream back (always assumed in this proxy).
    #[serde(default)]
    pub stream: bool,
}

impl CanonicalClaudeRequest {
    /// Returns `true` if extended thinking was requested and is enabled.
    #[must_use]
    pub fn thinking_enabled(&self) -> bool {
        self.thinking.as_ref().is_some_and(ThinkingConfig::is_enabled)
    }

    /// The requested thinking token budget, defaulting to 16000 (CodeWhisperer's
    /// fixed interleaved-thinking budget) when thinking is enabled but no
    /// explicit budget was supplied.
    #[must_use]
    pub fn thinking_budget(&self) -> Option<u32> {
        if !self.thinking_enabled() {
            return None;
        }
        Some(self.thinking.as_ref().and_then(ThinkingConfig::budget_tokens).unwrap_or(16_000))
    }

    /// Merge consecutive messages that share the same role into one, concatenating
    /// their content blocks in order. Required before building provider payloads
    /// that cannot represent two adjacent same-role turns (CodeWhisperer history).
    #[must_use]
    pub fn with_coalesced_history(mut self) -> Self {
        let mut coalesced: Vec<ClaudeMessage> = Vec::with_capacity(self.messages.len());
        for msg in self.messages.drain(..) {
            if let Some(last) = coalesced.last_mut() {
                if last.role == msg.role {
                    let mut blocks = std::mem::replace(&mut last.content, MessageContent::Blocks(Vec::new())).into_blocks();
                    blocks.extend(msg.content.into_blocks());
                    last.content = MessageContent::Blocks(blocks);
                    continue;
                }
            }
            coalesced.push(msg);
        }
        self.messages = coalesced;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentBlock;
    use serde_json::json;

    fn msg(role: Role, text: &str) -> ClaudeMessage {
        ClaudeMessage { role, content: MessageContent::Text(text.into()) }
    }

    #[test]
    fn deserializes_minimal_request() {
        let value = json!({
            "model": "claude-sonnet-4.5",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let req: CanonicalClaudeRequest = serde_json::from_value(value).unwrap();
        assert_eq!(req.model, "claude-sonnet-4.5");
        assert_eq!(req.messages.len(), 1);
        assert!(!req.thinking_enabled());
    }

    #[test]
    fn thinking_bool_true_enables_default_budget() {
        let req = CanonicalClaudeRequest {
            model: "m".into(),
            max_tokens: 10,
            temperature: None,
            system: None,
            messages: vec![],
            tools: None,
            tool_choice: None,
            thinking: Some(ThinkingConfig::Bool(true)),
            stream: true,
        };
        assert!(req.thinking_enabled());
        assert_eq!(req.thinking_budget(), Some(16_000));
    }

    #[test]
    fn thinking_structured_respects_explicit_budget() {
        let req = CanonicalClaudeRequest {
            model: "m".into(),
            max_tokens: 10,
            temperature: None,
            system: None,
            messages: vec![],
            tools: None,
            tool_choice: None,
            thinking: Some(ThinkingConfig::Structured { kind: "enabled".into(), budget_tokens: Some(4000) }),
            stream: true,
        };
        assert_eq!(req.thinking_budget(), Some(4000));
    }

    #[test]
    fn coalesces_consecutive_same_role_messages() {
        let req = CanonicalClaudeRequest {
            model: "m".into(),
            max_tokens: 10,
            temperature: None,
            system: None,
            messages: vec![msg(Role::User, "a"), msg(Role::User, "b"), msg(Role::Assistant, "c")],
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: true,
        };
        let coalesced = req.with_coalesced_history();
        assert_eq!(coalesced.messages.len(), 2);
        assert_eq!(
            coalesced.messages[0].content.as_blocks(),
            vec![ContentBlock::text("a"), ContentBlock::text("b")]
        );
    }

    #[test]
    fn no_coalescing_across_alternating_roles() {
        let req = CanonicalClaudeRequest {
            model: "m".into(),
            max_tokens: 10,
            temperature: None,
            system: None,
            messages: vec![msg(Role::User, "a"), msg(Role::Assistant, "b"), msg(Role::User, "c")],
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: true,
        };
        assert_eq!(req.with_coalesced_history().messages.len(), 3);
    }
}
