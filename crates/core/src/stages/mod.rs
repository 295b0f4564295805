//! Step executors. Each stage wraps one external capability and owns its own
//! input checks, output location and metadata keys.

pub mod concat;
pub mod content;
pub mod download;
pub mod silence;
pub mod timestamps;
pub mod transcript;
pub mod upload;

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::Instrument;

use crate::{
    config::AppConfig,
    error::Result,
    llm::{ChatClient, TextGenerator},
    media::{Ffmpeg, MediaToolkit},
    retry::RetryPolicy,
    speech::{SpeechToText, WhisperApi},
};

pub use concat::{ConcatOutput, ConcatStage};
pub use content::{ContentOutput, DescriptionStage, SeoStage, SocialPlatform, SocialStage};
pub use download::download_video;
pub use silence::SilenceStage;
pub use timestamps::{ChapterSource, TimestampMode, TimestampsOutput, TimestampsStage};
pub use transcript::{TranscriptOutput, TranscriptStage};
pub use upload::{BunnyUploadStage, UploadOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    SilenceRemoval,
    Concat,
    Timestamps,
    Transcript,
    Description,
    Seo,
    Social,
    Upload,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::SilenceRemoval,
        StageKind::Concat,
        StageKind::Timestamps,
        StageKind::Transcript,
        StageKind::Description,
        StageKind::Seo,
        StageKind::Social,
        StageKind::Upload,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::SilenceRemoval => "silence-removal",
            StageKind::Concat => "concat",
            StageKind::Timestamps => "timestamps",
            StageKind::Transcript => "transcript",
            StageKind::Description => "description",
            StageKind::Seo => "seo",
            StageKind::Social => "social",
            StageKind::Upload => "upload",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        match wanted.as_str() {
            "silence" => return Ok(StageKind::SilenceRemoval),
            "linkedin" | "twitter" => return Ok(StageKind::Social),
            _ => {}
        }
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<_> = StageKind::ALL.iter().map(StageKind::name).collect();
                format!("unknown stage `{s}` (expected one of: {})", names.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// A previous run's artifact satisfied the stage.
    Reused,
    /// Not selected for this run.
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub artifacts: Vec<PathBuf>,
    pub error: Option<String>,
    /// Degraded-mode decisions and per-item batch failures.
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl StageResult {
    pub fn completed(stage: StageKind, output: &impl StageOutput, elapsed: Duration) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            artifacts: output.artifacts(),
            error: None,
            warnings: output.warnings(),
            elapsed,
        }
    }

    pub fn reused(stage: StageKind, artifacts: Vec<PathBuf>) -> Self {
        Self {
            stage,
            status: StageStatus::Reused,
            artifacts,
            error: None,
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn skipped(stage: StageKind) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            artifacts: Vec::new(),
            error: None,
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn failed(stage: StageKind, error: String, elapsed: Duration) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            artifacts: Vec::new(),
            error: Some(error),
            warnings: Vec::new(),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != StageStatus::Failed
    }
}

/// What a stage hands back beyond success.
pub trait StageOutput {
    fn artifacts(&self) -> Vec<PathBuf>;

    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Outcome of a multi-item operation. One item failing never stops the rest.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failures.is_empty()
    }
}

impl StageOutput for BatchReport {
    fn artifacts(&self) -> Vec<PathBuf> {
        self.succeeded.clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|(path, reason)| format!("{}: {reason}", path.display()))
            .collect()
    }
}

/// The external collaborators a stage may use.
#[derive(Clone)]
pub struct Capabilities {
    pub media: Arc<dyn MediaToolkit>,
    pub speech: Arc<dyn SpeechToText>,
    pub text: Arc<dyn TextGenerator>,
    pub retry: RetryPolicy,
}

impl Capabilities {
    /// ffmpeg from `PATH` and the configured HTTP APIs.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            media: Arc::new(Ffmpeg::new()),
            speech: Arc::new(WhisperApi::new(config.clone())),
            text: Arc::new(ChatClient::new(config.clone())),
            retry: RetryPolicy::from_config(config),
        }
    }
}

pub trait Stage {
    const KIND: StageKind;
    type Output: StageOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<Self::Output>;

    /// Execute and fold any error into a failed result.
    async fn run(&self, caps: &Capabilities) -> StageResult {
        let started = Instant::now();
        let span = tracing::info_span!("stage", stage = %Self::KIND);

        match self.execute(caps).instrument(span).await {
            Ok(output) => {
                tracing::info!(stage = %Self::KIND, "stage completed");
                StageResult::completed(Self::KIND, &output, started.elapsed())
            }
            Err(e) => {
                tracing::warn!(stage = %Self::KIND, error = %e, "stage failed");
                StageResult::failed(Self::KIND, e.to_string(), started.elapsed())
            }
        }
    }
}

/// Stem of a path as a display string.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Finish an artifact written under its partial name.
pub(crate) async fn commit_partial(partial: &Path, final_path: &Path) -> Result<()> {
    tokio::fs::rename(partial, final_path).await?;
    Ok(())
}

/// Remove a partial artifact after a failed write. Missing files are fine.
pub(crate) async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %partial.display(), error = %e, "unable to remove partial output");
    }
}
