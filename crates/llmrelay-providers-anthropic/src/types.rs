//! CodeWhisperer wire types and the Claude -> Amazon Q model-mapping table.

use serde::Serialize;
use serde_json::Value;

/// Map a client-requested Claude model id onto the CodeWhisperer-accepted
/// model id. Unknown families fall back to `claude-sonnet-4.5`.
#[must_use]
pub fn map_model_to_codewhisperer(requested: &str) -> &'static str {
    let lower = requested.to_lowercase();

    if lower.contains("sonnet") {
        return if lower.contains("4.6") || lower.contains("4-6") {
            "claude-sonnet-4.6"
        } else {
            "claude-sonnet-4.5"
        };
    }

    if lower.contains("opus") {
        return if lower.contains("4.5") || lower.contains("4-5") {
            "claude-opus-4.5"
        } else {
            "claude-opus-4.6"
        };
    }

    if lower.contains("haiku") {
        return "claude-haiku-4.5";
    }

    "claude-sonnet-4.5"
}

/// `envState` stub, emitted only when the request carries tools.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvState {
    pub operating_system: &'static str,
    pub current_working_directory: &'static str,
}

impl Default for EnvState {
    fn default() -> Self {
        Self { operating_system: "macos", current_working_directory: "/" }
    }
}

/// One entry of `userInputMessageContext.toolResults`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultEntry {
    pub tool_use_id: String,
    pub content: Vec<Value>,
    pub status: &'static str,
}

/// One entry of `userInputMessageContext.tools`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecEntry {
    pub tool_specification: ToolSpecification,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// `currentMessage.userInputMessage.userInputMessageContext`.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_state: Option<EnvState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpecEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultEntry>>,
}

/// `currentMessage.userInputMessage`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub user_input_message_context: UserInputMessageContext,
    pub origin: &'static str,
    pub model_id: String,
}

/// `conversationState.currentMessage`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

/// `conversationState`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub conversation_id: String,
    pub history: Vec<Value>,
    pub current_message: CurrentMessage,
    pub chat_trigger_type: &'static str,
}

/// The full CodeWhisperer `GenerateAssistantResponse` request body.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeWhispererRequest {
    pub conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_46_maps_to_sonnet_46() {
        assert_eq!(map_model_to_codewhisperer("claude-sonnet-4-6-20260101"), "claude-sonnet-4.6");
        assert_eq!(map_model_to_codewhisperer("claude-sonnet-4.6"), "claude-sonnet-4.6");
    }

    #[test]
    fn other_sonnet_maps_to_sonnet_45() {
        assert_eq!(map_model_to_codewhisperer("claude-sonnet-4-5-20250929"), "claude-sonnet-4.5");
    }

    #[test]
    fn opus_45_maps_to_opus_45() {
        assert_eq!(map_model_to_codewhisperer("claude-opus-4-5-20251101"), "claude-opus-4.5");
    }

    #[test]
    fn other_opus_maps_to_opus_46() {
        assert_eq!(map_model_to_codewhisperer("claude-opus-4-20250514"), "claude-opus-4.6");
        assert_eq!(map_model_to_codewhisperer("claude-opus-4-6"), "claude-opus-4.6");
    }

    #[test]
    fn haiku_maps_to_haiku_45() {
        assert_eq!(map_model_to_codewhisperer("claude-haiku-4-5-20251001"), "claude-haiku-4.5");
    }

    #[test]
    fn unknown_model_falls_back_to_sonnet_45() {
        assert_eq!(map_model_to_codewhisperer("gpt-5"), "claude-sonnet-4.5");
    }

    #[test]
    fn mapping_is_case_insensitive() {
        assert_eq!(map_model_to_codewhisperer("CLAUDE-OPUS-4.5"), "claude-opus-4.5");
    }

    #[test]
    fn request_serializes_with_camel_case_and_skips_absent_profile_arn() {
        let req = CodeWhispererRequest {
            conversation_state: ConversationState {
                conversation_id: "11111111-1111-1111-1111-111111111111".into(),
                history: vec![],
                current_message: CurrentMessage {
                    user_input_message: UserInputMessage {
                        content: "hi".into(),
                        user_input_message_context: UserInputMessageContext::default(),
                        origin: "CLI",
                        model_id: "claude-sonnet-4.5".into(),
                    },
                },
                chat_trigger_type: "MANUAL",
            },
            profile_arn: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("profileArn").is_none());
        assert_eq!(value["conversationState"]["chatTriggerType"], "MANUAL");
        assert_eq!(
            value["conversationState"]["currentMessage"]["userInputMessage"]["modelId"],
            "claude-sonnet-4.5"
        );
    }
}
