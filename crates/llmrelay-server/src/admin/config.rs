//! `GET/PUT /v2/config` — the four whitelisted keys (§6).

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

/// The only `AppConfig` fields this endpoint may read or write.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigView {
    #[serde(default)]
    pub gemini_only_models: Vec<String>,
    #[serde(default)]
    pub amazonq_only_models: Vec<String>,
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
}

pub async fn get(State(state): State<AppState>) -> Json<ConfigView> {
    let config = state.router.config.read().expect("config lock poisoned");
    Json(ConfigView {
        gemini_only_models: config.gemini_only_models.clone(),
        amazonq_only_models: config.amazonq_only_models.clone(),
        supported_models: config.supported_models.clone(),
        model_mapping: config.model_mapping.clone(),
    })
}

pub async fn put(State(state): State<AppState>, Json(view): Json<ConfigView>) -> Json<ConfigView> {
    let mut config = state.router.config.write().expect("config lock poisoned");
    config.gemini_only_models = view.gemini_only_models.clone();
    config.amazonq_only_models = view.amazonq_only_models.clone();
    config.supported_models = view.supported_models.clone();
    config.model_mapping = view.model_mapping.clone();
    Json(view)
}
