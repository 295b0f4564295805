use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::{
    chapters::{self, Chapter},
    config::BunnyCredentials,
    error::{PipelineError, Result},
    metadata::{ArtifactValue, MetadataStore},
    stages::{Capabilities, Stage, StageKind, StageOutput, file_stem},
};

pub const BUNNY_API_BASE: &str = "https://video.bunnycdn.com";

/// Bunny Stream library API.
pub struct BunnyStream {
    client: reqwest::Client,
    base_url: String,
    credentials: BunnyCredentials,
}

#[derive(Deserialize)]
struct CreatedVideo {
    guid: String,
}

impl BunnyStream {
    pub fn new(credentials: BunnyCredentials) -> Self {
        Self::with_base_url(credentials, BUNNY_API_BASE)
    }

    pub fn with_base_url(credentials: BunnyCredentials, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn video_url(&self, guid: &str) -> String {
        format!(
            "{}/library/{}/videos/{guid}",
            self.base_url, self.credentials.library_id
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::external(
            "bunny",
            format!("HTTP {}: {}", status.as_u16(), body.trim()),
        ))
    }

    pub async fn create_video(&self, title: &str) -> Result<String> {
        let mut body = serde_json::json!({ "title": title });
        if let Some(collection) = &self.credentials.collection_id {
            body["collectionId"] = serde_json::json!(collection);
        }

        let response = self
            .client
            .post(format!(
                "{}/library/{}/videos",
                self.base_url, self.credentials.library_id
            ))
            .header("AccessKey", &self.credentials.access_key)
            .json(&body)
            .send()
            .await?;
        let created: CreatedVideo = Self::check(response).await?.json().await?;
        Ok(created.guid)
    }

    pub async fn upload_video(&self, guid: &str, video: &Path) -> Result<()> {
        let bytes = tokio::fs::read(video).await?;
        let response = self
            .client
            .put(self.video_url(guid))
            .header("AccessKey", &self.credentials.access_key)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn set_chapters(&self, guid: &str, chapters: &[Chapter]) -> Result<()> {
        let response = self
            .client
            .post(self.video_url(guid))
            .header("AccessKey", &self.credentials.access_key)
            .json(&chapters_payload(chapters))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn upload_captions(&self, guid: &str, vtt: &str) -> Result<()> {
        let language = &self.credentials.caption_language;
        let response = self
            .client
            .post(format!("{}/captions/{language}", self.video_url(guid)))
            .header("AccessKey", &self.credentials.access_key)
            .json(&serde_json::json!({
                "srclang": language,
                "label": language,
                "captionsFile": STANDARD.encode(vtt.as_bytes()),
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

pub fn chapters_payload(chapters: &[Chapter]) -> serde_json::Value {
    serde_json::json!({
        "chapters": chapters
            .iter()
            .map(|c| serde_json::json!({ "title": c.title, "start": c.start, "end": c.end }))
            .collect::<Vec<_>>()
    })
}

pub struct BunnyUploadStage {
    pub video: PathBuf,
    pub title: Option<String>,
    pub credentials: Option<BunnyCredentials>,
    pub timestamps: Option<PathBuf>,
    pub captions: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct UploadOutput {
    pub video_id: String,
    pub video: PathBuf,
    pub warnings: Vec<String>,
}

impl StageOutput for UploadOutput {
    fn artifacts(&self) -> Vec<PathBuf> {
        vec![self.video.clone()]
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

impl Stage for BunnyUploadStage {
    const KIND: StageKind = StageKind::Upload;
    type Output = UploadOutput;

    async fn execute(&self, _caps: &Capabilities) -> Result<UploadOutput> {
        let credentials = self.credentials.clone().ok_or_else(|| {
            PipelineError::invalid_input(
                &self.video,
                "Bunny credentials missing: set [bunny] in the config or BUNNY_LIBRARY_ID and BUNNY_ACCESS_KEY",
            )
        })?;
        if !self.video.is_file() {
            return Err(PipelineError::invalid_input(&self.video, "video file does not exist"));
        }

        let bunny = BunnyStream::new(credentials);
        let title = self.title.clone().unwrap_or_else(|| file_stem(&self.video));

        let guid = bunny.create_video(&title).await?;
        tracing::info!(%guid, video = %self.video.display(), "uploading to Bunny Stream");
        bunny.upload_video(&guid, &self.video).await?;

        let mut warnings = Vec::new();
        if let Some(path) = &self.timestamps
            && let Some(chapters) = chapters::load_timestamps(path).await
            && let Err(e) = bunny.set_chapters(&guid, &chapters).await
        {
            tracing::warn!(error = %e, "chapters were not attached");
            warnings.push(format!("chapters not attached: {e}"));
        }

        if let Some(path) = &self.captions {
            let attached = match tokio::fs::read_to_string(path).await {
                Ok(vtt) => bunny.upload_captions(&guid, &vtt).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = attached {
                tracing::warn!(error = %e, "captions were not attached");
                warnings.push(format!("captions not attached: {e}"));
            }
        }

        if let Some(dir) = self.video.parent() {
            MetadataStore::merge_write(dir, "bunny_video_id", ArtifactValue::text(guid.clone())).await?;
        }

        Ok(UploadOutput {
            video_id: guid,
            video: self.video.clone(),
            warnings,
        })
    }
}
