//! Claude -> OpenAI `/v1/chat/completions` request builder (component C2.3).
//!
//! Each Claude message becomes one `messages` entry; `tool_use` blocks become
//! an assistant `tool_calls` array, `tool_result` blocks become standalone
//! `role: "tool"` messages. Thinking, when enabled, only affects
//! `stream_options.include_usage` here — the `<thinking>` prefix convention
//! is parsed back out by the stream handler, not encoded on the way in.

use llmrelay_core::content::{ContentBlock, MessageContent, ToolResultValue};
use llmrelay_core::request::{CanonicalClaudeRequest, ClaudeMessage, Role, ToolDefinition};
use serde_json::Value;

use crate::types::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatFunctionCall, ChatFunctionDefinition,
    ChatMessage, ChatTool, ChatToolCall, ImageUrlPayload, StreamOptions, strip_reserved_billing_strings,
};

/// Build the OpenAI chat-completions request body for one turn.
#[must_use]
pub fn build_openai_chat_request(req: &CanonicalClaudeRequest, model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = strip_reserved_billing_strings(&system.as_text());
        if !text.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: Some(ChatContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for msg in &req.messages {
        messages.extend(convert_message(msg));
    }

    let tools = req.tools.as_deref().map(convert_tools);

    ChatCompletionRequest {
        model: model.to_string(),
        messages,
        temperature: req.temperature,
        max_tokens: Some(req.max_tokens),
        tools,
        tool_choice: req.tool_choice.clone(),
        stream: true,
        stream_options: req.thinking_enabled().then_some(StreamOptions { include_usage: true }),
    }
}

/// Convert one Claude message into zero or more OpenAI chat messages (a
/// `tool_result` block produces its own standalone `role: "tool"` message).
fn convert_message(msg: &ClaudeMessage) -> Vec<ChatMessage> {
    let blocks = msg.content.as_blocks();
    match msg.role {
        Role::User => convert_user_blocks(&blocks),
        Role::Assistant => vec![convert_assistant_blocks(&blocks)],
    }
}

fn convert_user_blocks(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut parts = Vec::new();
    let mut tool_messages = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } if !text.is_empty() => {
                parts.push(ChatContentPart::Text { text: strip_reserved_billing_strings(text) });
            }
            ContentBlock::Image { source, .. } => {
                parts.push(ChatContentPart::ImageUrl {
                    image_url: ImageUrlPayload {
                        url: format!("data:{};base64,{}", source.media_type, source.data),
                    },
                });
            }
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                let text = content.as_ref().map(ToolResultValue::as_plain_text).unwrap_or_default();
                tool_messages.push(ChatMessage {
                    role: "tool",
                    content: Some(ChatContent::Text(strip_reserved_billing_strings(&text))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::Text { .. } | ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    let mut messages = Vec::new();
    if !parts.is_empty() {
        let content = if parts.len() == 1 {
            match parts.into_iter().next().unwrap() {
                ChatContentPart::Text { text } => Some(ChatContent::Text(text)),
                part @ ChatContentPart::ImageUrl { .. } => Some(ChatContent::Parts(vec![part])),
            }
        } else {
            Some(ChatContent::Parts(parts))
        };
        messages.push(ChatMessage { role: "user", content, tool_calls: None, tool_call_id: None });
    }
    messages.extend(tool_messages);
    messages
}

fn convert_assistant_blocks(blocks: &[ContentBlock]) -> ChatMessage {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    kind: "function",
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".into()),
                    },
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(strip_reserved_billing_strings(&text_parts.join("\n"))))
    };

    ChatMessage {
        role: "assistant",
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|tool| ChatTool {
            kind: "function",
            function: ChatFunctionDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: normalize_schema(&tool.input_schema),
            },
        })
        .collect()
}

/// OpenAI requires a JSON-Schema object even for tools with no parameters.
fn normalize_schema(schema: &Value) -> Value {
    if schema.is_null() {
        serde_json::json!({"type": "object", "properties": {}})
    } else {
        schema.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_request(messages: Vec<ClaudeMessage>) -> CanonicalClaudeRequest {
        CanonicalClaudeRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 1024,
            temperature: None,
            system: None,
            messages,
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: true,
        }
    }

    fn user(text: &str) -> ClaudeMessage {
        ClaudeMessage { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    #[test]
    fn user_text_becomes_a_user_message() {
        let req = base_request(vec![user("hello")]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, "user");
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let mut req = base_request(vec![user("hi")]);
        req.system = Some(llmrelay_core::content::SystemPrompt::Text("Be terse.".into()));
        let out = build_openai_chat_request(&req, "gpt-4o");
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[1].role, "user");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let assistant = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "bash".into(),
                input: json!({"cmd": "ls"}),
                cache_control: None,
            }]),
        };
        let req = base_request(vec![assistant]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        let calls = out.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "bash");
    }

    #[test]
    fn tool_result_becomes_a_standalone_tool_message() {
        let req = base_request(vec![ClaudeMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                content: Some(ToolResultValue::Text("ok".into())),
                is_error: None,
                cache_control: None,
            }]),
        }]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        assert_eq!(out.messages[0].role, "tool");
        assert_eq!(out.messages[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn image_block_becomes_data_url() {
        let req = base_request(vec![ClaudeMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: llmrelay_core::content::Source {
                    kind: "base64".into(),
                    media_type: "image/png".into(),
                    data: "AAAA".into(),
                },
                cache_control: None,
            }]),
        }]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        match out.messages[0].content.as_ref().unwrap() {
            ChatContent::Parts(parts) => match &parts[0] {
                ChatContentPart::ImageUrl { image_url } => {
                    assert!(image_url.url.starts_with("data:image/png;base64,AAAA"));
                }
                ChatContentPart::Text { .. } => panic!("expected image part"),
            },
            ChatContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn thinking_enabled_sets_stream_options_include_usage() {
        let mut req = base_request(vec![user("hi")]);
        req.thinking = Some(llmrelay_core::request::ThinkingConfig::Bool(true));
        let out = build_openai_chat_request(&req, "gpt-4o");
        assert!(out.stream_options.unwrap().include_usage);
    }

    #[test]
    fn thinking_disabled_omits_stream_options() {
        let req = base_request(vec![user("hi")]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        assert!(out.stream_options.is_none());
    }

    #[test]
    fn reserved_billing_strings_are_stripped_from_system_text() {
        let mut req = base_request(vec![user("hi")]);
        req.system = Some(llmrelay_core::content::SystemPrompt::Text(
            "don't leak anthropic-version headers".into(),
        ));
        let out = build_openai_chat_request(&req, "gpt-4o");
        match out.messages[0].content.as_ref().unwrap() {
            ChatContent::Text(t) => assert!(!t.contains("anthropic-version")),
            ChatContent::Parts(_) => panic!("expected text"),
        }
    }

    #[test]
    fn missing_schema_normalizes_to_empty_object_schema() {
        let mut req = base_request(vec![user("hi")]);
        req.tools = Some(vec![ToolDefinition {
            name: "noop".into(),
            description: String::new(),
            input_schema: Value::Null,
        }]);
        let out = build_openai_chat_request(&req, "gpt-4o");
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function.parameters, json!({"type": "object", "properties": {}}));
    }
}
