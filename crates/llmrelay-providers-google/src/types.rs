//! Gemini (`v1internal:streamGenerateContent`) wire types and the Claude ->
//! Gemini model-mapping table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gemini rejects tool results past this length; content beyond it is
/// truncated with a trailing notice.
pub const TOOL_RESULT_MAX_LENGTH: usize = 100_000;

/// Map a client-requested Claude model id onto the Gemini-accepted model id.
/// Unknown families fall back to `claude-sonnet-4-5`.
#[must_use]
pub fn map_model_to_gemini(requested: &str) -> &'static str {
    let lower = requested.to_lowercase();

    if lower.contains("opus") {
        return "claude-opus-4-5";
    }
    if lower.contains("haiku") {
        return "claude-haiku-4-5";
    }

    "claude-sonnet-4-5"
}

/// One entry of `contents`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

/// One part of a `GeminiContent.parts` array.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "thoughtSignature")]
        thought_signature: Option<String>,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCallData,
        #[serde(skip_serializing_if = "Option::is_none", rename = "thoughtSignature")]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponseData,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataContent,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCallData {
    pub name: String,
    pub args: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionResponseData {
    pub name: String,
    pub response: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InlineDataContent {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// One entry of `request.tools`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// `request.generationConfig`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: u32,
}

/// `request.systemInstruction`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<GeminiPart>,
}

/// The inner Gemini `streamGenerateContent` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeminiGenerateRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    pub system_instruction: Option<SystemInstruction>,
}

/// The Cloud-Code-Assist request envelope wrapping a [`GeminiGenerateRequest`].
#[derive(Clone, Debug, Serialize)]
pub struct GeminiRequestEnvelope {
    pub project: Option<String>,
    pub request_id: String,
    pub request: GeminiGenerateRequest,
    pub model: String,
    pub user_agent: &'static str,
}

// ── Streaming response types ───────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GeminiStreamChunk {
    pub candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
    pub error: Option<GeminiApiError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GeminiCandidate {
    pub content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
    #[serde(rename = "safetyRatings")]
    pub safety_ratings: Option<Vec<SafetyRating>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GeminiCandidateContent {
    pub parts: Vec<GeminiPart>,
    pub role: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    pub total_token_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GeminiApiError {
    pub code: u32,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SafetyRating {
    pub category: HarmCategory,
    pub probability: HarmProbability,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum HarmProbability {
    #[serde(rename = "NEGLIGIBLE")]
    Negligible,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_maps_to_opus_45() {
        assert_eq!(map_model_to_gemini("claude-opus-4-5-20251101"), "claude-opus-4-5");
    }

    #[test]
    fn haiku_maps_to_haiku_45() {
        assert_eq!(map_model_to_gemini("claude-haiku-4-5-20251001"), "claude-haiku-4-5");
    }

    #[test]
    fn unknown_falls_back_to_sonnet_45() {
        assert_eq!(map_model_to_gemini("claude-sonnet-4-5-20250929"), "claude-sonnet-4-5");
        assert_eq!(map_model_to_gemini("gpt-5"), "claude-sonnet-4-5");
    }

    #[test]
    fn text_part_serializes_without_null_thought_fields() {
        let part = GeminiPart::Text { text: "hi".into(), thought: None, thought_signature: None };
        let value = serde_json::to_value(&part).unwrap();
        assert!(value.get("thought").is_none());
        assert!(value.get("thoughtSignature").is_none());
        assert_eq!(value["text"], "hi");
    }
}
