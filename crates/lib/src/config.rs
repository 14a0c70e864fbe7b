//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.machan/config.json`) and environment.
//! The model section picks the endpoint and model; the persona section holds the
//! fixed strings the assistant is configured with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persona instruction sent with every request.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Dhatusena, a friendly and cool AI assistant from Sri Lanka. Your personality is fun, engaging, and very casual. You must communicate in 'Singlish' (a mix of Sinhala and English, using English characters to write Sinhala words) which is the common spoken language. For example, instead of writing 'කොහොමද?' in Sinhala script, you should write 'kohomada?'. Always use plenty of relevant emojis 😎👍 to make the conversation lively and expressive. Keep your responses friendly and natural, like talking to a friend.";

/// First bot message shown when a conversation starts.
pub const DEFAULT_GREETING: &str = "Halow machan.. Mokada wenne ah 😼🙌. Mokak hari udawwak oneda ? Mama ධාතුසේන. Kohomada oyata udaw karanna puluwan? Oyata pictures or voice messages unath ewanna puluwan. 😊";

/// Text that replaces the bot placeholder when a stream fails.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry machan, podi aulak una. 😕 Ayeth try karanna.";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model endpoint settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Persona strings (system instruction, greeting, fallback).
    #[serde(default)]
    pub persona: PersonaConfig,
}

/// Endpoint, model name, and API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// API root (default the public Generative Language v1beta endpoint).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier (default "gemini-2.5-flash").
    #[serde(default = "default_model")]
    pub name: String,

    /// API key. Overridden by GEMINI_API_KEY or API_KEY env.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            name: default_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,

    /// Seeded as the first bot message. Empty string disables the greeting.
    #[serde(default = "default_greeting")]
    pub greeting: String,

    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_instruction: default_system_instruction(),
            greeting: default_greeting(),
            fallback_message: default_fallback_message(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_fallback_message() -> String {
    DEFAULT_FALLBACK_MESSAGE.to_string()
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the API key: env GEMINI_API_KEY, then API_KEY, then config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok().and_then(|v| non_blank(&v)))
        .or_else(|| config.model.api_key.as_deref().and_then(non_blank))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MACHAN_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".machan").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or MACHAN_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.model.name, "gemini-2.5-flash");
        assert_eq!(config.model.base_url, DEFAULT_BASE_URL);
        assert!(config.model.api_key.is_none());
        assert_eq!(config.persona.fallback_message, DEFAULT_FALLBACK_MESSAGE);
        assert!(config.persona.system_instruction.starts_with("You are Dhatusena"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "model": { "name": "gemini-2.0-flash" }, "persona": { "greeting": "" } }"#,
        )
        .unwrap();
        assert_eq!(config.model.name, "gemini-2.0-flash");
        assert_eq!(config.model.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.persona.greeting, "");
        assert_eq!(config.persona.fallback_message, DEFAULT_FALLBACK_MESSAGE);
    }

    #[test]
    fn load_config_missing_file_is_default() {
        let path = std::env::temp_dir().join("machan-config-test-does-not-exist.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.model.name, DEFAULT_MODEL);
    }

    #[test]
    fn load_config_rejects_malformed_json() {
        let path = std::env::temp_dir().join(format!(
            "machan-config-test-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load_config(Some(path.clone())).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn non_blank_trims_and_filters() {
        assert_eq!(non_blank("  key  "), Some("key".to_string()));
        assert_eq!(non_blank("   "), None);
    }
}
