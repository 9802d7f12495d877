// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1200
}
fn default_temperature() -> f32 {
    0.2
}

/// Text generator settings for match explanations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "openai" (case-insensitive)
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Disabled defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let mut cfg: AiConfig = serde_json::from_str(data)?;
        cfg.provider = cfg.provider.to_lowercase();

        if cfg.enabled && cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if !(0.0..=2.0).contains(&cfg.temperature) {
            cfg.temperature = default_temperature();
        }
        if cfg.max_tokens == 0 {
            cfg.max_tokens = default_max_tokens();
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_key_is_resolved() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let cfg = AiConfig::from_json(r#"{"enabled":true,"provider":"OpenAI","api_key":"ENV"}"#).unwrap();
        env::remove_var("OPENAI_API_KEY");
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.max_tokens, 1200);
    }

    #[test]
    #[serial]
    fn missing_env_key_is_an_error() {
        env::remove_var("OPENAI_API_KEY");
        assert!(AiConfig::from_json(r#"{"enabled":true,"provider":"openai","api_key":"ENV"}"#).is_err());
    }

    #[test]
    fn disabled_config_skips_key_lookup() {
        let cfg = AiConfig::from_json(r#"{"enabled":false,"provider":"openai","api_key":"ENV","temperature":9.0}"#)
            .unwrap();
        assert_eq!(cfg.api_key, "ENV");
        assert_eq!(cfg.temperature, 0.2);
    }
}
