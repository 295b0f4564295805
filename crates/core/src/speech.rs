use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

use crate::{
    config::AppConfig,
    error::{PipelineError, Result},
    types::{Segment, Transcription},
};

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcription>;
}

/// OpenAI-compatible `/audio/transcriptions` endpoint (Groq, OpenAI).
pub struct WhisperApi {
    client: reqwest::Client,
    config: AppConfig,
}

#[derive(Deserialize)]
struct VerboseJson {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl WhisperApi {
    pub fn new(config: AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe(&self, audio: &Path) -> Result<Transcription> {
        let settings = self.config.transcription()?;
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(file_name))
            .text("model", settings.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", settings.base_url))
            .bearer_auth(&settings.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                "speech-to-text",
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let parsed: VerboseJson = response.json().await?;
        Ok(Transcription {
            text: parsed.text,
            language: parsed.language.unwrap_or_else(|| "unknown".to_string()),
            segments: parsed.segments,
        })
    }
}
