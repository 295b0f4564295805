//! User configuration.
//!
//! Loaded once from `<config_dir>/vidpipe/config.toml`, merged with
//! environment variables and then handed to every collaborator as an
//! immutable value.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    provider::Provider,
};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3-turbo";
pub const TRANSCRIPTION_KEY_ENV: &str = "GROQ_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub transcription: TranscriptionSection,
    pub retry: RetrySection,
    pub links: Vec<Link>,
    pub bunny: BunnySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Provider,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Per-command overrides keyed by command name (`description`, `seo`, ...).
    pub commands: BTreeMap<String, LlmOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmOverride {
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSection {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for TranscriptionSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TRANSCRIPTION_URL.to_string(),
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BunnySection {
    pub library_id: Option<String>,
    pub access_key: Option<String>,
    pub collection_id: Option<String>,
    pub caption_language: Option<String>,
}

/// Endpoint, model and key for one chat-completions command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunnyCredentials {
    pub library_id: String,
    pub access_key: String,
    pub collection_id: Option<String>,
    pub caption_language: String,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vidpipe")
        .join(CONFIG_FILE_NAME)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&content).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry.delay_secs)
    }

    /// Resolve chat settings for `command`, falling back to the `[llm]` defaults
    /// and then to the provider preset.
    pub fn llm_for(&self, command: &str) -> Result<LlmSettings> {
        let preset = self.llm.provider.config();
        let command_override = self.llm.commands.get(command);

        let base_url = command_override
            .and_then(|o| o.base_url.clone())
            .or_else(|| self.llm.base_url.clone())
            .unwrap_or_else(|| preset.base_url.to_string());
        let model = command_override
            .and_then(|o| o.model.clone())
            .or_else(|| self.llm.model.clone())
            .unwrap_or_else(|| preset.model.to_string());
        let api_key = self
            .llm
            .api_key
            .clone()
            .or_else(|| env_value(preset.env_var))
            .ok_or_else(|| PipelineError::MissingApiKey {
                env_var: preset.env_var.to_string(),
            })?;

        Ok(LlmSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }

    pub fn transcription(&self) -> Result<TranscriptionSettings> {
        let api_key = self
            .transcription
            .api_key
            .clone()
            .or_else(|| env_value(TRANSCRIPTION_KEY_ENV))
            .ok_or_else(|| PipelineError::MissingApiKey {
                env_var: TRANSCRIPTION_KEY_ENV.to_string(),
            })?;

        Ok(TranscriptionSettings {
            base_url: self.transcription.base_url.trim_end_matches('/').to_string(),
            model: self.transcription.model.clone(),
            api_key,
        })
    }

    /// Bunny Stream credentials from the config file or `BUNNY_*` variables.
    pub fn bunny(&self) -> Option<BunnyCredentials> {
        let library_id = self
            .bunny
            .library_id
            .clone()
            .or_else(|| env_value("BUNNY_LIBRARY_ID"))?;
        let access_key = self
            .bunny
            .access_key
            .clone()
            .or_else(|| env_value("BUNNY_ACCESS_KEY"))?;

        Some(BunnyCredentials {
            library_id,
            access_key,
            collection_id: self
                .bunny
                .collection_id
                .clone()
                .or_else(|| env_value("BUNNY_COLLECTION_ID")),
            caption_language: self
                .bunny
                .caption_language
                .clone()
                .or_else(|| env_value("BUNNY_CAPTION_LANGUAGE"))
                .unwrap_or_else(|| "en".to_string()),
        })
    }

    /// Render the effective configuration with secrets masked.
    pub fn describe(&self) -> String {
        let mut masked = self.clone();
        masked.llm.api_key = masked.llm.api_key.as_deref().map(mask_secret);
        masked.transcription.api_key = masked.transcription.api_key.as_deref().map(mask_secret);
        masked.bunny.access_key = masked.bunny.access_key.as_deref().map(mask_secret);
        toml::to_string_pretty(&masked).unwrap_or_default()
    }
}

pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
