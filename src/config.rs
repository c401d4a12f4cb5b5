/// Configuration module for inductive-coder.
///
/// Handles loading, validating, and providing default configuration values.
/// Environment variables take precedence over the file for the service URL
/// and model names.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::Stage;
use crate::model::HierarchyDepth;

pub const DEFAULT_CONFIG_PATH: &str = "inductive-coder.json";

// ── Default value functions ──────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string()]
}

fn default_concurrency() -> usize {
    1
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    /// File extensions (without dot) loaded from the input directory.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Documents processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub hierarchy_depth: HierarchyDepth,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub stage_models: StageModels,
}

/// Optional model override per pipeline stage.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct StageModels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_document: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_codebook: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decide_chunking: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_chunk: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorize_document: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            extensions: default_extensions(),
            concurrency: default_concurrency(),
            hierarchy_depth: HierarchyDepth::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            stage_models: StageModels::default(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl StageModels {
    pub fn get(&self, stage: Stage) -> Option<&str> {
        self.slot(stage).as_deref()
    }

    fn slot(&self, stage: Stage) -> &Option<String> {
        match stage {
            Stage::ReadDocument => &self.read_document,
            Stage::CreateCodeBook => &self.create_codebook,
            Stage::DecideChunking => &self.decide_chunking,
            Stage::CodeChunk => &self.code_chunk,
            Stage::CategorizeDocument => &self.categorize_document,
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut Option<String> {
        match stage {
            Stage::ReadDocument => &mut self.read_document,
            Stage::CreateCodeBook => &mut self.create_codebook,
            Stage::DecideChunking => &mut self.decide_chunking,
            Stage::CodeChunk => &mut self.code_chunk,
            Stage::CategorizeDocument => &mut self.categorize_document,
        }
    }
}

impl LlmConfig {
    /// Model used for `stage`: the stage override, else the general model.
    #[must_use]
    pub fn model_for(&self, stage: Stage) -> &str {
        self.stage_models.get(stage).unwrap_or(&self.model)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`]; when
    /// that file does not exist a template is generated and defaults are
    /// returned. A missing or invalid file named explicitly is an error.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            anyhow::ensure!(
                path == DEFAULT_CONFIG_PATH,
                "config file not found: {path}"
            );
            info!("{path} not found, using defaults");
            let cfg = Self::default();
            match cfg.save(path) {
                Ok(()) => info!("Generated config template: {path}"),
                Err(e) => warn!("Failed to generate config template: {e}"),
            }
            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        let cfg: Config =
            serde_json::from_str(&data).with_context(|| format!("invalid JSON in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Apply environment overrides. `lookup` is usually `std::env::var(..).ok()`.
    ///
    /// `OPENAI_MODEL` replaces `llm.model` only, so a stage model from the
    /// file still wins over it; a per-stage variable wins over both.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = non_empty("OPENAI_MODEL") {
            self.llm.model = model;
        }
        for stage in Stage::ALL {
            if let Some(model) = non_empty(stage.model_env_var()) {
                *self.llm.stage_models.slot_mut(stage) = Some(model);
            }
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.concurrency > 0, "concurrency must be positive");
        anyhow::ensure!(
            !self.extensions.is_empty(),
            "at least one file extension must be specified"
        );
        anyhow::ensure!(
            !self.llm.base_url.trim().is_empty(),
            "llm.base_url must not be empty"
        );
        anyhow::ensure!(!self.llm.model.trim().is_empty(), "llm.model must not be empty");
        anyhow::ensure!(
            (0.0..=2.0).contains(&self.llm.temperature),
            "llm.temperature must be between 0 and 2"
        );
        anyhow::ensure!(self.llm.timeout_secs > 0, "llm.timeout_secs must be positive");
        for stage in Stage::ALL {
            if let Some(model) = self.llm.stage_models.get(stage) {
                anyhow::ensure!(
                    !model.trim().is_empty(),
                    "llm.stage_models.{stage} must not be empty"
                );
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.extensions, vec!["txt", "md"]);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.hierarchy_depth, HierarchyDepth::Flat);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"concurrency": 4, "llm": {"model": "gpt-4o"}, "hierarchy_depth": "2"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.hierarchy_depth, HierarchyDepth::TwoLevel);
        // Other fields should have defaults
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.extensions, vec!["txt", "md"]);
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.extensions.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.llm.stage_models.code_chunk = Some(" ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_resolution_order() {
        let mut config = Config::default();
        config.llm.stage_models.decide_chunking = Some("file-chunker".to_string());
        config.apply_env_overrides(env(&[
            ("OPENAI_MODEL", "env-general"),
            ("CODE_CHUNK_MODEL", "env-coder"),
        ]));

        assert_eq!(config.llm.model_for(Stage::CodeChunk), "env-coder");
        assert_eq!(config.llm.model_for(Stage::DecideChunking), "file-chunker");
        assert_eq!(config.llm.model_for(Stage::ReadDocument), "env-general");
    }

    #[test]
    fn test_stage_env_beats_file_stage_model() {
        let mut config = Config::default();
        config.llm.stage_models.code_chunk = Some("file-coder".to_string());
        config.apply_env_overrides(env(&[("CODE_CHUNK_MODEL", "env-coder")]));
        assert_eq!(config.llm.model_for(Stage::CodeChunk), "env-coder");
    }

    #[test]
    fn test_env_base_url_and_empty_values() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ("OPENAI_MODEL", ""),
        ]));
        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_load_explicit_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.concurrency = 3;
        config.llm.stage_models.categorize_document = Some("gpt-4o".to_string());
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded, config);
    }
}
