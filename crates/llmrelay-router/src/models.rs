//! `GET /v1/models` — an OpenAI-compatible listing of the configured model set.

use serde::Serialize;

use llmrelay_config::AppConfig;

/// One entry of the `GET /v1/models` response, shaped like OpenAI's
/// `/v1/models` list so existing Claude-Code-style clients can reuse their
/// model picker against this proxy.
#[derive(Clone, Debug, Serialize)]
pub struct ModelEntry {
    /// Model id.
    pub id: String,
    /// Always `"model"`, matching OpenAI's object tag.
    pub object: &'static str,
    /// Always the proxy's own name, since no per-model owner is tracked.
    pub owned_by: &'static str,
}

/// `{"object": "list", "data": [...]}` envelope.
#[derive(Clone, Debug, Serialize)]
pub struct ModelList {
    /// Always `"list"`.
    pub object: &'static str,
    /// The model entries.
    pub data: Vec<ModelEntry>,
}

/// Build the model list from `config.supported_models`. An empty
/// `supported_models` (meaning "no restriction") falls back to the
/// channel-routing allow-lists so the endpoint never returns an empty list
/// just because the admin never configured an explicit allow-list.
#[must_use]
pub fn list_models(config: &AppConfig) -> ModelList {
    let mut ids: Vec<String> = if config.supported_models.is_empty() {
        config
            .gemini_only_models
            .iter()
            .chain(config.amazonq_only_models.iter())
            .cloned()
            .collect()
    } else {
        config.supported_models.clone()
    };
    ids.sort();
    ids.dedup();

    ModelList {
        object: "list",
        data: ids.into_iter().map(|id| ModelEntry { id, object: "model", owned_by: "llmrelay" }).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_allow_lists_when_supported_models_is_empty() {
        let config = AppConfig {
            gemini_only_models: vec!["gemini-2.0-flash".into()],
            amazonq_only_models: vec!["claude-3-5-sonnet".into()],
            ..AppConfig::default()
        };
        let list = list_models(&config);
        assert_eq!(list.data.len(), 2);
    }

    #[test]
    fn uses_supported_models_when_set() {
        let config = AppConfig { supported_models: vec!["one".into(), "two".into()], ..AppConfig::default() };
        let list = list_models(&config);
        assert_eq!(list.data.len(), 2);
    }

    #[test]
    fn dedups_and_sorts() {
        let config = AppConfig { supported_models: vec!["b".into(), "a".into(), "b".into()], ..AppConfig::default() };
        let list = list_models(&config);
        let ids: Vec<&str> = list.data.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
