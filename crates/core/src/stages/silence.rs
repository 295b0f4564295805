use std::path::{Path, PathBuf};

use crate::{
    error::{PipelineError, Result},
    paths::{self, PROCESSED_DIR_NAME},
    stages::{BatchReport, Capabilities, Stage, StageKind, commit_partial, discard_partial, file_stem},
    types::TimeSpan,
};

pub const DEFAULT_MIN_SILENCE: f64 = 1.0;
pub const DEFAULT_NOISE_DB: f64 = -45.0;
/// Silence left on each side of a cut.
pub const DEFAULT_PADDING: f64 = 0.25;
const MIN_SPAN: f64 = 0.05;

pub struct SilenceStage {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub min_silence: f64,
    pub noise_db: f64,
    pub padding: f64,
}

impl SilenceStage {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            min_silence: DEFAULT_MIN_SILENCE,
            noise_db: DEFAULT_NOISE_DB,
            padding: DEFAULT_PADDING,
        }
    }

    pub fn output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    pub fn min_silence(mut self, seconds: f64) -> Self {
        self.min_silence = seconds;
        self
    }

    /// `<input>/processed/` for a directory, `<stem>_trimmed.<ext>` beside a file.
    pub fn output_location(&self) -> PathBuf {
        if let Some(explicit) = &self.output {
            return explicit.clone();
        }
        if self.input.is_dir() {
            return self.input.join(PROCESSED_DIR_NAME);
        }
        let ext = self
            .input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        self.input
            .with_file_name(format!("{}_trimmed.{ext}", file_stem(&self.input)))
    }

    async fn trim_one(&self, caps: &Capabilities, input: &Path, out: &Path) -> Result<()> {
        if input == out {
            return Err(PipelineError::invalid_input(
                out,
                "output would overwrite the source clip",
            ));
        }

        let info = caps.media.probe(input).await?;
        let silences = caps
            .media
            .detect_silence(input, self.min_silence, self.noise_db)
            .await?;
        let spans = keep_spans(&silences, info.duration, self.padding);
        tracing::info!(
            clip = %input.display(),
            silences = silences.len(),
            kept = spans.len(),
            "trimming silence"
        );

        paths::ensure_parent_dir(out).await?;
        let partial = paths::partial_path(out);
        let written = if silences.is_empty() || spans.is_empty() {
            tokio::fs::copy(input, &partial).await.map(|_| ()).map_err(PipelineError::from)
        } else {
            caps.media.keep_segments(input, &spans, &partial).await
        };

        match written {
            Ok(()) => commit_partial(&partial, out).await,
            Err(e) => {
                discard_partial(&partial).await;
                Err(e)
            }
        }
    }
}

impl Stage for SilenceStage {
    const KIND: StageKind = StageKind::SilenceRemoval;
    type Output = BatchReport;

    async fn execute(&self, caps: &Capabilities) -> Result<BatchReport> {
        if !self.input.exists() {
            return Err(PipelineError::invalid_input(&self.input, "does not exist"));
        }
        let out = self.output_location();

        if !self.input.is_dir() {
            if !paths::is_video(&self.input) {
                return Err(PipelineError::invalid_input(&self.input, "not a video file"));
            }
            self.trim_one(caps, &self.input, &out).await?;
            return Ok(BatchReport {
                succeeded: vec![out],
                failures: Vec::new(),
            });
        }

        let clips = paths::list_clips(&self.input)?;
        if clips.is_empty() {
            return Err(PipelineError::invalid_input(&self.input, "contains no video clips"));
        }

        let mut report = BatchReport::default();
        for clip in clips {
            let Some(name) = clip.file_name() else {
                continue;
            };
            let target = out.join(name);
            match self.trim_one(caps, &clip, &target).await {
                Ok(()) => report.succeeded.push(target),
                Err(e) => {
                    tracing::warn!(clip = %clip.display(), error = %e, "clip failed, continuing with the rest");
                    report.failures.push((clip, e.to_string()));
                }
            }
        }

        if report.all_failed() {
            return Err(PipelineError::external(
                "silence-removal",
                format!("every clip failed; first error: {}", report.failures[0].1),
            ));
        }
        Ok(report)
    }
}

/// Invert detected silences into spans to keep, leaving `padding` of each
/// silence in place so speech is not clipped.
pub fn keep_spans(silences: &[TimeSpan], duration: f64, padding: f64) -> Vec<TimeSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0.0;

    for silence in silences {
        // No padding is kept at the very start or end of the clip.
        let cut_start = if silence.start <= 0.0 {
            0.0
        } else {
            silence.start + padding
        };
        let cut_end = if silence.end >= duration {
            duration
        } else {
            silence.end - padding
        };
        if cut_end - cut_start <= 0.0 {
            continue;
        }
        if cut_start > cursor {
            spans.push(TimeSpan::new(cursor, cut_start));
        }
        cursor = cursor.max(cut_end);
    }
    if duration > cursor {
        spans.push(TimeSpan::new(cursor, duration));
    }

    spans.retain(|s| s.len() >= MIN_SPAN);
    spans
}
