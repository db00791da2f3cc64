//! Content block types for the canonical Claude (Anthropic Messages API) request shape.
//!
//! These mirror the wire format of Anthropic's `/v1/messages` API byte-for-byte
//! (field names, tagging) since client requests are parsed directly into them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `cache_control` hint on a content block. Only `ephemeral` is recognized upstream;
/// any other value is accepted and ignored by the cache simulator (see `llmrelay-core::cache`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheControl {
    /// Cache control kind. Only `"ephemeral"` is currently meaningful.
    #[serde(rename = "type")]
    pub kind: String,
}

impl CacheControl {
    /// Returns `true` if this is an `ephemeral` cache hint.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.kind == "ephemeral"
    }
}

/// Base64-encoded image or document source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Always `"base64"` for inline content.
    #[serde(rename = "type")]
    pub kind: String,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// One element of a message's `content` array, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
        /// Optional Anthropic prompt-cache hint.
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    /// Extended-thinking block (Claude's chain-of-thought, carried opaquely).
    #[serde(rename = "thinking")]
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Verification signature, required to replay a thinking block back to Claude.
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Inline base64 image.
    #[serde(rename = "image")]
    Image {
        /// Image bytes and MIME type.
        source: Source,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    /// A tool invocation requested by the assistant.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Opaque id the client uses to correlate the eventual `tool_result`.
        id: String,
        /// Tool name.
        name: String,
        /// Tool arguments (arbitrary JSON object).
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    /// The result of executing a previously requested tool call.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The `tool_use` id this result answers.
        tool_use_id: String,
        /// Result payload: either a plain string or a list of text/image blocks.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultValue>,
        /// Whether the tool call failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

impl ContentBlock {
    /// Construct a plain text block with no cache hint.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    /// Returns `true` if this block is marked with an ephemeral `cache_control`.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        match self {
            Self::Text { cache_control, .. }
            | Self::Image { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => cache_control.as_ref().is_some_and(CacheControl::is_ephemeral),
            Self::Thinking { .. } => false,
        }
    }

    /// Returns the literal text if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// A stable canonical JSON serialization of this block, used by the
    /// cache-key extractor for non-text cacheable blocks (image, tool_use,
    /// tool_result) that have no natural text representation.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `tool_result.content` may be a bare string or a list of text/image blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultValue {
    /// A plain string result.
    Text(String),
    /// A list of text/image blocks (rich tool output).
    Blocks(Vec<ToolResultBlock>),
}

impl ToolResultValue {
    /// Flatten to a plain-text representation, joining block text with newlines
    /// and dropping images (the canonical builders re-embed images separately).
    #[must_use]
    pub fn as_plain_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ToolResultBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single block inside a rich `tool_result.content` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolResultBlock {
    /// Text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// Inline image.
    #[serde(rename = "image")]
    Image {
        /// Image bytes and MIME type.
        source: Source,
    },
}

impl ToolResultBlock {
    /// Returns the text if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// `content` of a single message: either a plain string or a list of blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// A plain string (shorthand for a single text block).
    Text(String),
    /// An ordered list of content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Normalize to a list of content blocks, wrapping a bare string in one text block.
    #[must_use]
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::text(text)],
            Self::Blocks(blocks) => blocks,
        }
    }

    /// Borrow as a list of content blocks without consuming; allocates for the
    /// bare-string case.
    #[must_use]
    pub fn as_blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::text(text.clone())],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }
}

/// `system` prompt: either a plain string or an ordered list of text blocks
/// (each optionally carrying a `cache_control` hint).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// A plain string.
    Text(String),
    /// A list of cacheable text blocks.
    Blocks(Vec<SystemBlock>),
}

/// One block of a list-form `system` prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Always `"text"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The text.
    pub text: String,
    /// Optional Anthropic prompt-cache hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemPrompt {
    /// Flatten to a single string, joining list-form blocks with newlines.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Cacheable text segments in request order (blocks carrying `cache_control.ephemeral`).
    #[must_use]
    pub fn cacheable_segments(&self) -> Vec<&str> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.cache_control.as_ref().is_some_and(CacheControl::is_ephemeral))
                .map(|b| b.text.as_str())
                .collect(),
        }
    }
}
