use std::path::{Path, PathBuf};

use crate::{
    error::{PipelineError, Result},
    metadata::{ArtifactValue, MetadataStore},
    paths,
    stages::{Capabilities, Stage, StageKind, StageOutput, commit_partial, discard_partial, file_stem},
    types::{EncodeProfile, MediaInfo},
};

pub struct ConcatStage {
    pub input_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    /// Stream-copy instead of re-encoding.
    pub fast: bool,
    pub profile: EncodeProfile,
}

#[derive(Debug, Clone)]
pub struct ConcatOutput {
    pub video: PathBuf,
    pub duration: f64,
    pub size_bytes: u64,
    /// Clip stems with their durations, in concat order.
    pub clips: Vec<(String, f64)>,
}

impl StageOutput for ConcatOutput {
    fn artifacts(&self) -> Vec<PathBuf> {
        vec![self.video.clone()]
    }
}

impl ConcatStage {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output: None,
            title: None,
            fast: false,
            profile: EncodeProfile::default(),
        }
    }

    /// `<input>/output/<title>.mp4` unless an explicit output is set.
    pub fn output_location(&self) -> PathBuf {
        match &self.output {
            Some(explicit) => explicit.clone(),
            None => paths::default_output_dir(&self.input_dir)
                .join(paths::title_to_filename(self.title.as_deref().unwrap_or(""))),
        }
    }

    async fn join(&self, caps: &Capabilities, clips: &[PathBuf], out: &Path) -> Result<()> {
        if self.fast {
            return caps.media.concat_copy(clips, out).await;
        }

        let scratch = tempfile::Builder::new().prefix("vidpipe-concat-").tempdir()?;
        let mut normalized = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            let target = scratch.path().join(format!("{i:04}.mp4"));
            tracing::info!(clip = %clip.display(), "re-encoding clip");
            caps.media.standardize(clip, &self.profile, &target).await?;
            normalized.push(target);
        }
        caps.media.concat_copy(&normalized, out).await
    }
}

impl Stage for ConcatStage {
    const KIND: StageKind = StageKind::Concat;
    type Output = ConcatOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<ConcatOutput> {
        let clips = paths::source_clips(&self.input_dir)?;
        let mut infos = Vec::with_capacity(clips.len());
        for clip in &clips {
            infos.push(caps.media.probe(clip).await?);
        }
        if self.fast {
            check_stream_copy(&clips, &infos)?;
        }

        let out = self.output_location();
        paths::ensure_parent_dir(&out).await?;
        let partial = paths::partial_path(&out);

        tracing::info!(clips = clips.len(), fast = self.fast, output = %out.display(), "concatenating");
        if let Err(e) = self.join(caps, &clips, &partial).await {
            discard_partial(&partial).await;
            return Err(e);
        }
        commit_partial(&partial, &out).await?;

        let size_bytes = tokio::fs::metadata(&out).await?.len();
        let clip_durations: Vec<(String, f64)> = clips
            .iter()
            .zip(&infos)
            .map(|(clip, info)| (file_stem(clip), info.duration))
            .collect();
        let duration = clip_durations.iter().map(|(_, d)| d).sum::<f64>();

        let title = self.title.clone().unwrap_or_else(|| file_stem(&out));
        if let Some(dir) = out.parent() {
            MetadataStore::merge_many(
                dir,
                vec![
                    ("video".to_string(), ArtifactValue::path(&out)),
                    ("title".to_string(), ArtifactValue::text(title)),
                    ("duration_seconds".to_string(), ArtifactValue::data(duration)),
                    ("file_size_bytes".to_string(), ArtifactValue::data(size_bytes)),
                    (
                        "concat_mode".to_string(),
                        ArtifactValue::text(if self.fast { "fast" } else { "standard" }),
                    ),
                ],
            )
            .await?;
        }

        Ok(ConcatOutput {
            video: out,
            duration,
            size_bytes,
            clips: clip_durations,
        })
    }
}

/// Stream copy only works when every clip matches the first one's codecs,
/// resolution and frame rate.
pub fn check_stream_copy(clips: &[PathBuf], infos: &[MediaInfo]) -> Result<()> {
    let Some(reference) = infos.first() else {
        return Ok(());
    };

    for (clip, info) in clips.iter().zip(infos).skip(1) {
        let mismatch = match (&reference.video, &info.video) {
            (Some(a), Some(b)) if a.codec != b.codec => {
                Some(format!("video codec {} vs {}", b.codec, a.codec))
            }
            (Some(a), Some(b)) if (a.width, a.height) != (b.width, b.height) => Some(format!(
                "resolution {}x{} vs {}x{}",
                b.width, b.height, a.width, a.height
            )),
            (Some(a), Some(b)) if a.frame_rate != b.frame_rate => {
                Some(format!("frame rate {} vs {}", b.frame_rate, a.frame_rate))
            }
            (Some(_), None) | (None, Some(_)) => Some("video stream presence differs".to_string()),
            _ => None,
        }
        .or_else(|| match (&reference.audio, &info.audio) {
            (Some(a), Some(b)) if a.codec != b.codec => {
                Some(format!("audio codec {} vs {}", b.codec, a.codec))
            }
            (Some(a), Some(b)) if (a.sample_rate, a.channels) != (b.sample_rate, b.channels) => {
                Some(format!(
                    "audio {} Hz/{} ch vs {} Hz/{} ch",
                    b.sample_rate, b.channels, a.sample_rate, a.channels
                ))
            }
            (Some(_), None) | (None, Some(_)) => Some("audio stream presence differs".to_string()),
            _ => None,
        });

        if let Some(reason) = mismatch {
            return Err(PipelineError::IncompatibleInputs {
                reason: format!(
                    "{} does not match {} ({reason}); drop --fast-concat to re-encode",
                    clip.display(),
                    clips[0].display()
                ),
            });
        }
    }
    Ok(())
}
