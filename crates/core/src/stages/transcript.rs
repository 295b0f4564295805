use std::path::{Path, PathBuf};

use crate::{
    error::{PipelineError, Result},
    format::{parse_vtt, transcription_to_vtt},
    metadata::{ArtifactValue, MetadataStore},
    paths::{self, OutputConvention},
    stages::{Capabilities, Stage, StageKind, StageOutput},
    types::Transcription,
};

pub const TRANSCRIPT_FILE_NAME: &str = "transcript.vtt";

pub struct TranscriptStage {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TranscriptOutput {
    pub path: PathBuf,
    pub transcription: Transcription,
}

impl StageOutput for TranscriptOutput {
    fn artifacts(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

impl TranscriptStage {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
        }
    }

    pub fn output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    pub fn output_location(&self) -> PathBuf {
        paths::resolve_output_location(
            &self.input,
            self.output.as_deref(),
            OutputConvention::File(TRANSCRIPT_FILE_NAME),
        )
    }

    async fn transcribe(&self, caps: &Capabilities) -> Result<Transcription> {
        if paths::is_audio(&self.input) {
            return caps
                .retry
                .run("speech-to-text", || caps.speech.transcribe(&self.input))
                .await;
        }

        // Deleted when the guard drops, whichever way this returns.
        let audio = tempfile::Builder::new()
            .prefix("vidpipe-audio-")
            .suffix(".mp3")
            .tempfile()?;
        tracing::info!(video = %self.input.display(), "extracting audio");
        caps.media.extract_audio(&self.input, audio.path()).await?;

        caps.retry
            .run("speech-to-text", || caps.speech.transcribe(audio.path()))
            .await
    }
}

impl Stage for TranscriptStage {
    const KIND: StageKind = StageKind::Transcript;
    type Output = TranscriptOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<TranscriptOutput> {
        if !self.input.is_file() {
            return Err(PipelineError::invalid_input(&self.input, "is not a file"));
        }
        if !paths::is_video(&self.input) && !paths::is_audio(&self.input) {
            return Err(PipelineError::invalid_input(
                &self.input,
                "is neither a supported video nor audio file",
            ));
        }

        let transcription = self.transcribe(caps).await?;
        if transcription.is_empty() {
            return Err(PipelineError::external(
                "speech-to-text",
                "returned an empty transcript",
            ));
        }

        let fallback_duration = if transcription.segments.is_empty() {
            match caps.media.probe(&self.input).await {
                Ok(info) => info.duration,
                Err(e) => {
                    tracing::warn!(error = %e, "unable to probe duration for single-cue transcript");
                    0.0
                }
            }
        } else {
            transcription.duration()
        };

        let out = self.output_location();
        let vtt = transcription_to_vtt(&transcription, fallback_duration);
        paths::write_atomic(&out, &vtt).await?;

        if let Some(dir) = out.parent() {
            MetadataStore::merge_many(
                dir,
                vec![
                    ("transcript".to_string(), ArtifactValue::text(transcription.text.trim())),
                    ("transcript_path".to_string(), ArtifactValue::path(&out)),
                ],
            )
            .await?;
        }
        tracing::info!(path = %out.display(), segments = transcription.segments.len(), "transcript written");

        Ok(TranscriptOutput {
            path: out,
            transcription,
        })
    }
}

/// Read a WebVTT transcript written by this stage (or any other tool).
pub async fn load_transcript(path: &Path) -> Result<Transcription> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::dependency_missing(
                format!("transcript {}", path.display()),
                "Run `vidpipe transcript <video>` first.",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let segments = parse_vtt(&content);
    let text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if text.trim().is_empty() {
        return Err(PipelineError::invalid_input(path, "transcript has no cues"));
    }

    Ok(Transcription {
        text,
        language: String::new(),
        segments,
    })
}
