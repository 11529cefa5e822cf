//! Engine and oracle configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the turn engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracle: OracleConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Settings for the external chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "gemma2-9b-it".to_string()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
        }
    }
}

impl OracleConfig {
    /// Environment overrides, applied on top of whatever was loaded.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("HEGEMON_ORACLE_URL") {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var("HEGEMON_ORACLE_KEY") {
            self.api_key = key;
        }
        if let Ok(model) = std::env::var("HEGEMON_ORACLE_MODEL") {
            self.model = model;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tunables for turn resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Exploration radius revealed around player cities at end of turn.
    #[serde(default = "default_reveal_radius")]
    pub city_reveal_radius: u32,
    /// Cap on player cities/units included in the oracle projection.
    #[serde(default = "default_projection_limit")]
    pub projection_limit: usize,
}

fn default_reveal_radius() -> u32 {
    2
}

fn default_projection_limit() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            city_reveal_radius: default_reveal_radius(),
            projection_limit: default_projection_limit(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.engine.city_reveal_radius, 2);
        assert_eq!(config.engine.projection_limit, 10);
        assert!(!config.oracle.model.is_empty());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml::from_str("oracle:\n  model: test-model\n").unwrap();
        assert_eq!(config.oracle.model, "test-model");
        assert_eq!(config.logging.level, "info");
    }
}
