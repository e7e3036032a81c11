// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Service configuration: TOML file with serde defaults, selected values
//! overridable through environment variables.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::geo::{FilterConfig, OrchestratorConfig, RetryPolicy};
use crate::mask::MaskConfig;

/// Top-level service settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub hypothesis: HypothesisSettings,
    pub detector: DetectorSettings,
    pub geocode: GeocodeSettings,
    pub mask: MaskSettings,
    pub ner: NerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypothesisSettings {
    /// OpenAI-compatible sidecar endpoint
    pub endpoint: String,
    pub model: String,
    /// Bearer token; usually injected via GEO_VLM_API_KEY
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for HypothesisSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081".to_string(),
            model: "geo-vlm".to_string(),
            api_key: None,
            max_retries: 3,
            base_backoff_ms: 800,
            max_backoff_ms: 20_000,
            attempt_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Open-vocabulary detection sidecar endpoint
    pub endpoint: String,
    pub box_threshold: f32,
    pub text_threshold: f32,
    pub max_area_frac: f32,
    pub reference_width: u32,
    pub reference_height: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082".to_string(),
            box_threshold: 0.37,
            text_threshold: 0.25,
            max_area_frac: 0.25,
            reference_width: 720,
            reference_height: 540,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodeSettings {
    pub endpoint: String,
    /// Minimum gap between lookups, process-wide
    pub min_interval_ms: u64,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org".to_string(),
            min_interval_ms: 1100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaskSettings {
    pub min_block_px: u32,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self { min_block_px: 12 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NerSettings {
    /// Paths to the ONNX model and tokenizer; NER is skipped when unset
    pub model_path: Option<String>,
    pub tokenizer_path: Option<String>,
    /// BIO label list in model output order; CoNLL defaults when unset
    pub labels: Option<Vec<String>>,
}

impl Settings {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Environment overrides for deploy-time knobs.
    fn apply_env(&mut self) {
        if let Ok(v) = env::var("API_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = env::var("GEO_VLM_ENDPOINT") {
            self.hypothesis.endpoint = v;
        }
        if let Ok(v) = env::var("GEO_VLM_MODEL") {
            self.hypothesis.model = v;
        }
        if let Ok(v) = env::var("GEO_VLM_API_KEY") {
            self.hypothesis.api_key = Some(v);
        }
        if let Ok(v) = env::var("DETECTOR_ENDPOINT") {
            self.detector.endpoint = v;
        }
        if let Ok(v) = env::var("GEOCODE_ENDPOINT") {
            self.geocode.endpoint = v;
        }
        if let Ok(v) = env::var("NER_MODEL_PATH") {
            self.ner.model_path = Some(v);
        }
        if let Ok(v) = env::var("NER_TOKENIZER_PATH") {
            self.ner.tokenizer_path = Some(v);
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.hypothesis.max_retries.max(1),
            base_delay: Duration::from_millis(self.hypothesis.base_backoff_ms),
            max_delay: Duration::from_millis(self.hypothesis.max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.hypothesis.attempt_timeout_ms),
        }
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            box_threshold: self.detector.box_threshold,
            text_threshold: self.detector.text_threshold,
            max_area_frac: self.detector.max_area_frac,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            reference_width: self.detector.reference_width,
            reference_height: self.detector.reference_height,
        }
    }

    pub fn mask_config(&self) -> MaskConfig {
        MaskConfig { min_block_px: self.mask.min_block_px }
    }

    pub fn geocode_min_interval(&self) -> Duration {
        Duration::from_millis(self.geocode.min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_design() {
        let settings = Settings::default();
        assert_eq!(settings.detector.box_threshold, 0.37);
        assert_eq!(settings.detector.text_threshold, 0.25);
        assert_eq!(settings.detector.max_area_frac, 0.25);
        assert_eq!(settings.detector.reference_width, 720);
        assert_eq!(settings.detector.reference_height, 540);
        assert_eq!(settings.mask.min_block_px, 12);
        assert_eq!(settings.geocode.min_interval_ms, 1100);
        assert_eq!(settings.hypothesis.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [detector]
            box_threshold = 0.5

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(settings.detector.box_threshold, 0.5);
        assert_eq!(settings.detector.text_threshold, 0.25);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Settings::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_policy_floor_one_attempt() {
        let mut settings = Settings::default();
        settings.hypothesis.max_retries = 0;
        assert_eq!(settings.retry_policy().max_attempts, 1);
    }
}
