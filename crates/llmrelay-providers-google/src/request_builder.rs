//! Claude -> Gemini `streamGenerateContent` request builder (component C2.2).
//!
//! Maps Claude roles/content onto Gemini `contents`/`parts`, preserves
//! signed `thinking` blocks as `{thought: true, text}` parts, resolves
//! `tool_result` names against the nearest matching `functionCall` in
//! history, and strips JSON-Schema keywords Gemini rejects while folding
//! their semantics into the tool description.

use std::collections::HashMap;

use llmrelay_core::content::{ContentBlock, ToolResultValue};
use llmrelay_core::request::{CanonicalClaudeRequest, ClaudeMessage, Role, ToolDefinition};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{
    FunctionCallData, FunctionDeclaration, FunctionResponseData, GeminiContent, GeminiGenerateRequest,
    GeminiPart, GeminiRequestEnvelope, GeminiTool, GenerationConfig, SystemInstruction,
    TOOL_RESULT_MAX_LENGTH, map_model_to_gemini,
};

/// JSON-Schema keywords Gemini's validator rejects outright.
const UNSUPPORTED_SCHEMA_KEYWORDS: &[&str] = &[
    "additionalProperties",
    "$schema",
    "exclusiveMaximum",
    "exclusiveMinimum",
    "const",
    "examples",
];

/// Fallback name used for a `functionResponse` whose matching `functionCall`
/// cannot be found anywhere in history.
const UNKNOWN_TOOL_NAME: &str = "tool_result";

/// Build the Gemini `streamGenerateContent` request envelope for one turn.
#[must_use]
pub fn build_gemini_request(
    req: &CanonicalClaudeRequest,
    project: Option<String>,
) -> GeminiRequestEnvelope {
    let call_name_by_id = index_function_call_names(&req.messages);
    let contents = convert_messages(&req.messages, &call_name_by_id);

    let thinking_budget = req.thinking_budget().unwrap_or(0);
    let max_output_tokens = req.max_tokens.max(thinking_budget) + 1;

    let tools = convert_tools(req.tools.as_deref().unwrap_or(&[]));
    let system_instruction = req.system.as_ref().map(|system| {
        let text = system.as_text();
        SystemInstruction { parts: vec![GeminiPart::Text { text, thought: None, thought_signature: None }] }
    });

    GeminiRequestEnvelope {
        project,
        request_id: Uuid::new_v4().to_string(),
        request: GeminiGenerateRequest {
            contents,
            generation_config: GenerationConfig { max_output_tokens },
            tools: if tools.is_empty() { None } else { Some(tools) },
            system_instruction,
        },
        model: map_model_to_gemini(&req.model).to_string(),
        user_agent: "llmrelay/1.0",
    }
}

/// Map every `tool_use` id in assistant history to its tool name, so a
/// later `tool_result` that omits a name can be resolved by id.
fn index_function_call_names(messages: &[ClaudeMessage]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for msg in messages {
        if msg.role != Role::Assistant {
            continue;
        }
        for block in msg.content.as_blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                map.insert(id, name);
            }
        }
    }
    map
}

fn convert_messages(messages: &[ClaudeMessage], call_name_by_id: &HashMap<String, String>) -> Vec<GeminiContent> {
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User => {
                let (parts, tool_result_contents) = convert_user_blocks(&msg.content.as_blocks(), call_name_by_id);
                if !parts.is_empty() {
                    contents.push(GeminiContent { role: "user".into(), parts });
                }
                for part in tool_result_contents {
                    contents.push(GeminiContent { role: "user".into(), parts: vec![part] });
                }
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                for block in msg.content.as_blocks() {
                    match block {
                        ContentBlock::Text { text, .. } if !text.is_empty() => {
                            parts.push(GeminiPart::Text { text, thought: None, thought_signature: None });
                        }
                        ContentBlock::Thinking { thinking, signature: Some(signature) } => {
                            parts.push(GeminiPart::Text { text: thinking, thought: Some(true), thought_signature: Some(signature) });
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            parts.push(GeminiPart::FunctionCall {
                                function_call: FunctionCallData { name, args: input },
                                thought_signature: None,
                            });
                        }
                        ContentBlock::Text { .. } | ContentBlock::Thinking { .. } | ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
                    }
                }

                if parts.is_empty() {
                    continue;
                }
                // A thought-only turn has no text Gemini will accept on its own.
                if parts.iter().all(|p| matches!(p, GeminiPart::Text { thought: Some(true), .. })) {
                    parts.push(GeminiPart::Text { text: ".".into(), thought: None, thought_signature: None });
                }
                contents.push(GeminiContent { role: "model".into(), parts });
            }
        }
    }

    contents
}

/// Split a user turn's blocks into plain content parts and separate
/// `functionResponse` contents (each `tool_result` becomes its own turn).
fn convert_user_blocks(
    blocks: &[ContentBlock],
    call_name_by_id: &HashMap<String, String>,
) -> (Vec<GeminiPart>, Vec<GeminiPart>) {
    let mut parts = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => {
                if !text.is_empty() {
                    parts.push(GeminiPart::Text { text: text.clone(), thought: None, thought_signature: None });
                }
            }
            ContentBlock::Image { source, .. } => {
                parts.push(GeminiPart::InlineData {
                    inline_data: crate::types::InlineDataContent { mime_type: source.media_type.clone(), data: source.data.clone() },
                });
            }
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                let name = call_name_by_id.get(tool_use_id).cloned().unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string());
                let text = truncate_tool_result(&render_tool_result_text(content.as_ref()));
                tool_results.push(GeminiPart::FunctionResponse {
                    function_response: FunctionResponseData {
                        name,
                        response: serde_json::json!({"result": text, "tool_call_id": tool_use_id}),
                    },
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    (parts, tool_results)
}

fn render_tool_result_text(content: Option<&ToolResultValue>) -> String {
    match content {
        Some(ToolResultValue::Text(text)) => text.clone(),
        Some(ToolResultValue::Blocks(blocks)) => {
            blocks.iter().filter_map(llmrelay_core::content::ToolResultBlock::as_text).collect::<Vec<_>>().join("\n")
        }
        None => String::new(),
    }
}

fn truncate_tool_result(content: &str) -> String {
    if content.len() <= TOOL_RESULT_MAX_LENGTH {
        content.to_string()
    } else {
        let truncated = &content[..TOOL_RESULT_MAX_LENGTH];
        format!("{truncated}\n\n[Content truncated — {TOOL_RESULT_MAX_LENGTH} char limit]")
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<GeminiTool> {
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .map(|tool| {
            let (schema, dropped) = sanitize_schema_for_gemini(&tool.input_schema);
            let description = if dropped.is_empty() {
                tool.description.clone()
            } else {
                format!("{}\n\n(additional constraints: {})", tool.description, dropped.join(", "))
            };
            FunctionDeclaration { name: tool.name.clone(), description, parameters: schema }
        })
        .collect();

    if declarations.is_empty() { vec![] } else { vec![GeminiTool { function_declarations: declarations }] }
}

/// Strip JSON-Schema keywords Gemini rejects, returning the cleaned schema
/// plus a flat list of `"keyword: value"` notes for the dropped keywords so
/// their semantic content can be folded into the tool description.
fn sanitize_schema_for_gemini(schema: &Value) -> (Value, Vec<String>) {
    let mut dropped = Vec::new();
    let cleaned = sanitize_recursive(schema, &mut dropped);
    (cleaned, dropped)
}

fn sanitize_recursive(schema: &Value, dropped: &mut Vec<String>) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = serde_json::Map::new();
            for (key, value) in map {
                if UNSUPPORTED_SCHEMA_KEYWORDS.contains(&key.as_str()) {
                    dropped.push(format!("{key}={value}"));
                    continue;
                }
                cleaned.insert(key.clone(), sanitize_recursive(value, dropped));
            }
            Value::Object(cleaned)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| sanitize_recursive(v, dropped)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmrelay_core::content::MessageContent;
    use llmrelay_core::request::ThinkingConfig;
    use serde_json::json;

    fn user(text: &str) -> ClaudeMessage {
        ClaudeMessage { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    fn req(messages: Vec<ClaudeMessage>) -> CanonicalClaudeRequest {
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

    #[test]
    fn user_text_becomes_a_user_turn() {
        let built = build_gemini_request(&req(vec![user("hi")]), None);
        assert_eq!(built.request.contents.len(), 1);
        assert_eq!(built.request.contents[0].role, "user");
    }

    #[test]
    fn assistant_tool_use_becomes_function_call() {
        let msg = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "bash".into(),
                input: json!({"cmd": "ls"}),
                cache_control: None,
            }]),
        };
        let built = build_gemini_request(&req(vec![msg]), None);
        assert_eq!(built.request.contents[0].role, "model");
        match &built.request.contents[0].parts[0] {
            GeminiPart::FunctionCall { function_call, .. } => assert_eq!(function_call.name, "bash"),
            _ => panic!("expected function call"),
        }
    }

    #[test]
    fn tool_result_resolves_name_from_history() {
        let assistant = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse { id: "call_1".into(), name: "bash".into(), input: json!({}), cache_control: None }]),
        };
        let tool_result = ClaudeMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                content: Some(ToolResultValue::Text("ok".into())),
                is_error: None,
                cache_control: None,
            }]),
        };
        let built = build_gemini_request(&req(vec![user("go"), assistant, tool_result]), None);
        let last = built.request.contents.last().unwrap();
        match &last.parts[0] {
            GeminiPart::FunctionResponse { function_response } => assert_eq!(function_response.name, "bash"),
            _ => panic!("expected function response"),
        }
    }

    #[test]
    fn unresolvable_tool_result_falls_back_to_generic_name() {
        let tool_result = ClaudeMessage {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "call_missing".into(),
                content: None,
                is_error: None,
                cache_control: None,
            }]),
        };
        let built = build_gemini_request(&req(vec![tool_result]), None);
        match &built.request.contents[0].parts[0] {
            GeminiPart::FunctionResponse { function_response } => assert_eq!(function_response.name, "tool_result"),
            _ => panic!("expected function response"),
        }
    }

    #[test]
    fn signed_thinking_block_is_preserved_as_thought_part() {
        let msg = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking { thinking: "reasoning".into(), signature: Some("sig".into()) },
                ContentBlock::Text { text: "answer".into(), cache_control: None },
            ]),
        };
        let built = build_gemini_request(&req(vec![msg]), None);
        match &built.request.contents[0].parts[0] {
            GeminiPart::Text { thought, thought_signature, .. } => {
                assert_eq!(*thought, Some(true));
                assert_eq!(thought_signature.as_deref(), Some("sig"));
            }
            _ => panic!("expected thought part"),
        }
    }

    #[test]
    fn thought_only_turn_gets_placeholder_text() {
        let msg = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::Thinking { thinking: "reasoning".into(), signature: Some("sig".into()) }]),
        };
        let built = build_gemini_request(&req(vec![msg]), None);
        assert_eq!(built.request.contents[0].parts.len(), 2);
        assert!(matches!(&built.request.contents[0].parts[1], GeminiPart::Text { thought: None, .. }));
    }

    #[test]
    fn unsigned_thinking_block_is_dropped() {
        let msg = ClaudeMessage {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Thinking { thinking: "reasoning".into(), signature: None },
                ContentBlock::Text { text: "answer".into(), cache_control: None },
            ]),
        };
        let built = build_gemini_request(&req(vec![msg]), None);
        assert_eq!(built.request.contents[0].parts.len(), 1);
    }

    #[test]
    fn max_output_tokens_accounts_for_thinking_budget() {
        let mut request = req(vec![user("hi")]);
        request.max_tokens = 100;
        request.thinking = Some(ThinkingConfig::Structured { kind: "enabled".into(), budget_tokens: Some(500) });
        let built = build_gemini_request(&request, None);
        assert_eq!(built.request.generation_config.max_output_tokens, 501);
    }

    #[test]
    fn max_output_tokens_without_thinking_is_max_tokens_plus_one() {
        let built = build_gemini_request(&req(vec![user("hi")]), None);
        assert_eq!(built.request.generation_config.max_output_tokens, 1025);
    }

    #[test]
    fn schema_sanitization_strips_unsupported_keywords_and_notes_them() {
        let tools = vec![ToolDefinition {
            name: "bash".into(),
            description: "Run a command".into(),
            input_schema: json!({"type": "object", "additionalProperties": false, "$schema": "http://json-schema.org/draft-07/schema#"}),
        }];
        let declarations = convert_tools(&tools);
        assert!(declarations[0].function_declarations[0].parameters.get("additionalProperties").is_none());
        assert!(declarations[0].function_declarations[0].description.contains("additional constraints"));
    }

    #[test]
    fn empty_tools_returns_no_tools_array() {
        let built = build_gemini_request(&req(vec![user("hi")]), None);
        assert!(built.request.tools.is_none());
    }

    #[test]
    fn project_is_carried_through() {
        let built = build_gemini_request(&req(vec![user("hi")]), Some("proj-123".into()));
        assert_eq!(built.project.as_deref(), Some("proj-123"));
    }
}
