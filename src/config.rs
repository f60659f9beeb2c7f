//! API configuration file.
//!
//! ```json
//! { "gpt-4o-mini": { "model_list": [
//!     { "model_name": "gpt-4o-mini", "model_url": "https://api.openai.com/v1", "api_key": "sk-..." }
//! ] } }
//! ```

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

use crate::error::{CrasError, Result};

/// One endpoint entry under `model_list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(alias = "base_url")]
    pub model_url: String,
    #[serde(default)]
    pub api_key: String,

    // USD per 1K tokens; overrides the built-in price table
    #[serde(default)]
    pub prompt_price_per_1k: Option<f64>,
    #[serde(default)]
    pub completion_price_per_1k: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    model_list: Vec<ModelConfig>,
}

/// Load the entry for `model_key` and return the first configured endpoint.
/// An empty `api_key` falls back to `$OPENAI_API_KEY`.
pub fn load_api_config(path: &Path, model_key: &str) -> Result<ModelConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| CrasError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_api_config(&raw, model_key, &path.display().to_string())
}

fn parse_api_config(raw: &str, model_key: &str, origin: &str) -> Result<ModelConfig> {
    let mut entries: HashMap<String, ModelEntry> = serde_json::from_str(raw)
        .map_err(|e| CrasError::Config(format!("{origin} is not a valid api config: {e}")))?;

    let entry = entries
        .remove(model_key)
        .ok_or_else(|| CrasError::Config(format!("model '{model_key}' not found in {origin}")))?;

    let mut cfg = entry
        .model_list
        .into_iter()
        .next()
        .ok_or_else(|| CrasError::Config(format!("model '{model_key}' has an empty model_list")))?;

    if cfg.api_key.trim().is_empty() {
        cfg.api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "ds": { "model_list": [
            { "model_name": "deepseek-chat", "model_url": "http://localhost:1/v1", "api_key": "k1",
              "prompt_price_per_1k": 0.5 },
            { "model_name": "ignored", "model_url": "http://x", "api_key": "k2" }
        ] },
        "empty": { "model_list": [] }
    }"#;

    #[test]
    fn picks_first_entry_of_model_list() {
        let cfg = parse_api_config(SAMPLE, "ds", "test").unwrap();
        assert_eq!(cfg.model_name, "deepseek-chat");
        assert_eq!(cfg.api_key, "k1");
        assert_eq!(cfg.prompt_price_per_1k, Some(0.5));
        assert_eq!(cfg.completion_price_per_1k, None);
    }

    #[test]
    fn missing_key_is_config_error() {
        let err = parse_api_config(SAMPLE, "nope", "test").unwrap_err();
        assert!(matches!(err, CrasError::Config(ref m) if m.contains("'nope' not found")));
    }

    #[test]
    fn empty_model_list_is_config_error() {
        let err = parse_api_config(SAMPLE, "empty", "test").unwrap_err();
        assert!(matches!(err, CrasError::Config(_)));
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let err = load_api_config(Path::new("/definitely/not/here.json"), "ds").unwrap_err();
        assert!(matches!(err, CrasError::Config(_)));
    }
}
