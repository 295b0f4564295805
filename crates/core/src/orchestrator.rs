//! Full pipeline runs.
//!
//! Stages run strictly in order. A stage whose artifact already exists is
//! reused unless the run is forced, and a failed stage is recorded without
//! stopping the stages after it.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use tracing::Instrument;
use uuid::Uuid;

use crate::{
    chapters::{self, Granularity, TIMESTAMPS_FILE_NAME},
    config::{AppConfig, BunnyCredentials, Link},
    error::PipelineError,
    metadata::MetadataStore,
    paths::{self, PROCESSED_DIR_NAME},
    stages::{
        BunnyUploadStage, Capabilities, ConcatStage, DescriptionStage, SeoStage, SilenceStage,
        SocialPlatform, SocialStage, Stage, StageKind, StageResult, StageStatus,
        TimestampMode, TimestampsStage, TranscriptStage,
        content::{DESCRIPTION_FILE_NAME, KEYWORDS_FILE_NAME},
        silence::DEFAULT_MIN_SILENCE,
        transcript::TRANSCRIPT_FILE_NAME,
    },
    types::EncodeProfile,
};

/// Everything one `pipeline` invocation needs, collected up front.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub input_dir: PathBuf,
    /// Resolved but not created; stages create it at first write.
    pub output_dir: PathBuf,
    pub title: Option<String>,
    pub fast_concat: bool,
    pub remove_silence: bool,
    pub min_silence: f64,
    pub timestamp_mode: TimestampMode,
    pub skip: BTreeSet<StageKind>,
    pub upload_bunny: bool,
    /// Re-run stages whose artifacts already exist.
    pub force: bool,
    pub links: Vec<Link>,
    pub code_link: Option<String>,
    pub bunny: Option<BunnyCredentials>,
}

impl PipelineRun {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        let input_dir = input_dir.into();
        Self {
            output_dir: paths::default_output_dir(&input_dir),
            input_dir,
            title: None,
            fast_concat: false,
            remove_silence: false,
            min_silence: DEFAULT_MIN_SILENCE,
            timestamp_mode: TimestampMode::default(),
            skip: BTreeSet::new(),
            upload_bunny: false,
            force: false,
            links: Vec::new(),
            code_link: None,
            bunny: None,
        }
    }

    /// Links and Bunny credentials from the user's configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.links = config.links.clone();
        self.bunny = config.bunny();
        self
    }

    pub fn transcript_chapters(mut self, granularity: Granularity, notes: Option<String>) -> Self {
        self.timestamp_mode = TimestampMode::Transcript { granularity, notes };
        self
    }

    pub fn is_selected(&self, stage: StageKind) -> bool {
        if self.skip.contains(&stage) {
            return false;
        }
        match stage {
            StageKind::SilenceRemoval => self.remove_silence,
            StageKind::Upload => self.upload_bunny,
            _ => true,
        }
    }

    pub fn video_path(&self) -> PathBuf {
        self.output_dir
            .join(paths::title_to_filename(self.title.as_deref().unwrap_or("")))
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.output_dir.join(TRANSCRIPT_FILE_NAME)
    }

    pub fn timestamps_path(&self) -> PathBuf {
        self.output_dir.join(TIMESTAMPS_FILE_NAME)
    }

    pub fn description_path(&self) -> PathBuf {
        self.output_dir.join(DESCRIPTION_FILE_NAME)
    }

    pub fn keywords_path(&self) -> PathBuf {
        self.output_dir.join(KEYWORDS_FILE_NAME)
    }

    pub fn social_path(&self, platform: SocialPlatform) -> PathBuf {
        self.output_dir.join(platform.file_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(StageKind),
    Done,
}

/// Progress callbacks for a front end.
pub trait RunObserver {
    fn stage_started(&self, _stage: StageKind) {}
    fn stage_finished(&self, _result: &StageResult) {}
}

impl RunObserver for () {}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub results: Vec<StageResult>,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn failures(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn result(&self, stage: StageKind) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

pub struct Orchestrator<'a> {
    caps: &'a Capabilities,
    run: PipelineRun,
    observer: &'a dyn RunObserver,
    state: RunState,
    results: Vec<StageResult>,
    video: Option<PathBuf>,
    transcript: Option<PathBuf>,
    transcript_attempted: bool,
    /// Stages that wrote new output during this run.
    fresh: BTreeSet<StageKind>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(caps: &'a Capabilities, run: PipelineRun, observer: &'a dyn RunObserver) -> Self {
        Self {
            caps,
            run,
            observer,
            state: RunState::Pending,
            results: Vec::new(),
            video: None,
            transcript: None,
            transcript_attempted: false,
            fresh: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn execute(mut self) -> PipelineReport {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!("pipeline", %run_id);

        async {
            tracing::info!(
                input = %self.run.input_dir.display(),
                output = %self.run.output_dir.display(),
                force = self.run.force,
                "pipeline started"
            );
            self.silence_removal().await;
            self.concat().await;
            self.transcribe().await;
            self.timestamps().await;
            self.description().await;
            self.seo().await;
            self.social().await;
            self.upload().await;
            self.state = RunState::Done;
            tracing::info!(elapsed = ?started.elapsed(), "pipeline finished");
        }
        .instrument(span)
        .await;

        PipelineReport {
            run_id,
            results: self.results,
            elapsed: started.elapsed(),
        }
    }

    fn begin(&mut self, stage: StageKind) {
        self.state = RunState::Running(stage);
        tracing::debug!(%stage, "stage starting");
        self.observer.stage_started(stage);
    }

    fn record(&mut self, result: StageResult) -> bool {
        let ok = result.is_success();
        if result.status == StageStatus::Completed {
            self.fresh.insert(result.stage);
        }
        self.observer.stage_finished(&result);
        self.results.push(result);
        ok
    }

    fn reuse(&mut self, stage: StageKind, artifacts: Vec<PathBuf>) {
        tracing::info!(%stage, "reusing existing output");
        self.record(StageResult::reused(stage, artifacts));
    }

    fn skip(&mut self, stage: StageKind) {
        self.record(StageResult::skipped(stage));
    }

    fn fail_early(&mut self, stage: StageKind, error: PipelineError) {
        tracing::warn!(%stage, error = %error, "stage cannot run");
        self.record(StageResult::failed(stage, error.to_string(), Duration::ZERO));
    }

    /// An existing artifact counts only if none of its inputs were rebuilt.
    fn reusable(&self, path: &Path, inputs: &[StageKind]) -> bool {
        if self.run.force || !path.is_file() {
            return false;
        }
        match inputs.iter().find(|stage| self.fresh.contains(stage)) {
            Some(stage) => {
                tracing::info!(path = %path.display(), upstream = %stage, "upstream output changed, rebuilding");
                false
            }
            None => true,
        }
    }

    async fn silence_removal(&mut self) {
        let stage = StageKind::SilenceRemoval;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }

        let processed = self.run.input_dir.join(PROCESSED_DIR_NAME);
        if !self.run.force
            && let Ok(clips) = paths::list_clips(&processed)
            && !clips.is_empty()
        {
            return self.reuse(stage, clips);
        }

        self.begin(stage);
        let result = SilenceStage::new(&self.run.input_dir)
            .output(Some(processed))
            .min_silence(self.run.min_silence)
            .run(self.caps)
            .await;
        self.record(result);
    }

    async fn known_video(&self) -> Option<PathBuf> {
        let planned = self.run.video_path();
        if planned.is_file() {
            return Some(planned);
        }
        MetadataStore::load(&self.run.output_dir)
            .await
            .path("video")
            .filter(|p| p.is_file())
    }

    async fn concat(&mut self) {
        let stage = StageKind::Concat;
        if !self.run.is_selected(stage) {
            self.video = self.known_video().await;
            return self.skip(stage);
        }

        let video = self.run.video_path();
        if self.reusable(&video, &[StageKind::SilenceRemoval]) {
            self.video = Some(video.clone());
            return self.reuse(stage, vec![video]);
        }

        self.begin(stage);
        let result = ConcatStage {
            input_dir: self.run.input_dir.clone(),
            output: Some(video.clone()),
            title: self.run.title.clone(),
            fast: self.run.fast_concat,
            profile: EncodeProfile::default(),
        }
        .run(self.caps)
        .await;
        if self.record(result) {
            self.video = Some(video);
        }
    }

    async fn run_transcript(&mut self, video: PathBuf) -> StageResult {
        self.transcript_attempted = true;
        self.begin(StageKind::Transcript);
        let result = TranscriptStage::new(video)
            .output(Some(self.run.transcript_path()))
            .run(self.caps)
            .await;
        if result.is_success() {
            self.transcript = Some(self.run.transcript_path());
        }
        result
    }

    async fn transcribe(&mut self) {
        let stage = StageKind::Transcript;
        let path = self.run.transcript_path();
        if !self.run.is_selected(stage) {
            if path.is_file() {
                self.transcript = Some(path);
            }
            return self.skip(stage);
        }
        if self.reusable(&path, &[StageKind::Concat]) {
            self.transcript = Some(path.clone());
            return self.reuse(stage, vec![path]);
        }

        let Some(video) = self.video.clone() else {
            self.transcript_attempted = true;
            return self.fail_early(
                stage,
                PipelineError::dependency_missing("video", "Run `vidpipe concat <input_dir>` first."),
            );
        };
        let result = self.run_transcript(video).await;
        self.record(result);
    }

    /// The transcript, generated on demand when a later stage needs one.
    async fn ensure_transcript(&mut self) -> Option<PathBuf> {
        if self.transcript.is_some() {
            return self.transcript.clone();
        }
        let path = self.run.transcript_path();
        if path.is_file() {
            self.transcript = Some(path);
            return self.transcript.clone();
        }
        if self.transcript_attempted {
            return None;
        }

        let video = self.video.clone()?;
        tracing::info!("no transcript yet, generating it first");
        let mut result = self.run_transcript(video).await;
        result.warnings.push("generated on demand".to_string());
        self.record(result);
        self.transcript.clone()
    }

    fn missing_transcript() -> PipelineError {
        PipelineError::dependency_missing(
            "transcript",
            "Run `vidpipe transcript <video>` first, or let the pipeline run its concat stage.",
        )
    }

    async fn timestamps(&mut self) {
        let stage = StageKind::Timestamps;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }

        let path = self.run.timestamps_path();
        if self.reusable(&path, &[StageKind::SilenceRemoval, StageKind::Concat, StageKind::Transcript])
            && let Ok(content) = tokio::fs::read_to_string(&path).await
            && chapters::parse_timestamps(&content).is_ok()
        {
            return self.reuse(stage, vec![path]);
        }

        let from_transcript = matches!(self.run.timestamp_mode, TimestampMode::Transcript { .. });
        let transcript = if from_transcript {
            match self.ensure_transcript().await {
                Some(t) => Some(t),
                None => return self.fail_early(stage, Self::missing_transcript()),
            }
        } else {
            self.transcript.clone()
        };

        self.begin(stage);
        let result = TimestampsStage {
            input_dir: self.run.input_dir.clone(),
            output: Some(path),
            mode: self.run.timestamp_mode.clone(),
            transcript,
            video: self.video.clone(),
            title: self.run.title.clone(),
        }
        .run(self.caps)
        .await;
        self.record(result);
    }

    async fn description(&mut self) {
        let stage = StageKind::Description;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }
        let path = self.run.description_path();
        if self.reusable(&path, &[StageKind::Transcript, StageKind::Timestamps]) {
            return self.reuse(stage, vec![path]);
        }

        let Some(transcript) = self.ensure_transcript().await else {
            return self.fail_early(stage, Self::missing_transcript());
        };

        self.begin(stage);
        let result = DescriptionStage {
            transcript,
            timestamps: Some(self.run.timestamps_path()),
            output: Some(path),
            title: self.run.title.clone(),
            links: self.run.links.clone(),
            code_link: self.run.code_link.clone(),
        }
        .run(self.caps)
        .await;
        self.record(result);
    }

    async fn seo(&mut self) {
        let stage = StageKind::Seo;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }
        let path = self.run.keywords_path();
        if self.reusable(&path, &[StageKind::Description]) {
            return self.reuse(stage, vec![path]);
        }

        let description = self.run.description_path();
        let transcript = if description.is_file() {
            None
        } else {
            match self.ensure_transcript().await {
                Some(t) => Some(t),
                None => return self.fail_early(stage, Self::missing_transcript()),
            }
        };

        self.begin(stage);
        let result = SeoStage {
            description: Some(description),
            transcript,
            output: Some(path),
            title: self.run.title.clone(),
            links: self.run.links.clone(),
            code_link: self.run.code_link.clone(),
        }
        .run(self.caps)
        .await;
        self.record(result);
    }

    async fn social(&mut self) {
        let stage = StageKind::Social;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }

        let platforms = [SocialPlatform::LinkedIn, SocialPlatform::Twitter];
        let pending: Vec<SocialPlatform> = platforms
            .into_iter()
            .filter(|p| !self.reusable(&self.run.social_path(*p), &[StageKind::Transcript]))
            .collect();
        if pending.is_empty() {
            let artifacts = platforms.iter().map(|p| self.run.social_path(*p)).collect();
            return self.reuse(stage, artifacts);
        }

        let Some(transcript) = self.ensure_transcript().await else {
            return self.fail_early(stage, Self::missing_transcript());
        };
        // A transcript generated just now invalidates every existing post.
        let pending: Vec<SocialPlatform> = platforms
            .iter()
            .copied()
            .filter(|p| !self.reusable(&self.run.social_path(*p), &[StageKind::Transcript]))
            .collect();

        self.begin(stage);
        let started = Instant::now();
        let mut artifacts = Vec::new();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        for platform in platforms {
            let out = self.run.social_path(platform);
            if !pending.contains(&platform) {
                artifacts.push(out);
                continue;
            }
            let social = SocialStage {
                platform,
                transcript: transcript.clone(),
                output: Some(out),
                title: self.run.title.clone(),
            };
            let posted = social.run(self.caps).await;
            artifacts.extend(posted.artifacts);
            warnings.extend(posted.warnings);
            if let Some(e) = posted.error {
                tracing::warn!(platform = platform.command(), error = %e, "social post failed");
                errors.push(format!("{}: {e}", platform.command()));
            }
        }

        let result = if artifacts.is_empty() {
            StageResult::failed(stage, errors.join("; "), started.elapsed())
        } else {
            warnings.extend(errors);
            StageResult {
                stage,
                status: StageStatus::Completed,
                artifacts,
                error: None,
                warnings,
                elapsed: started.elapsed(),
            }
        };
        self.record(result);
    }

    async fn upload(&mut self) {
        let stage = StageKind::Upload;
        if !self.run.is_selected(stage) {
            return self.skip(stage);
        }

        let Some(video) = self.video.clone() else {
            return self.fail_early(
                stage,
                PipelineError::dependency_missing("video", "Run `vidpipe concat <input_dir>` first."),
            );
        };
        if !self.run.force
            && !self.fresh.contains(&StageKind::Concat)
            && MetadataStore::load(&self.run.output_dir)
                .await
                .text("bunny_video_id")
                .is_some()
        {
            return self.reuse(stage, vec![video]);
        }

        let timestamps = Some(self.run.timestamps_path()).filter(|p| p.is_file());
        let captions = self.transcript.clone().filter(|p| p.is_file());

        self.begin(stage);
        let result = BunnyUploadStage {
            video,
            title: self.run.title.clone(),
            credentials: self.run.bunny.clone(),
            timestamps,
            captions,
        }
        .run(self.caps)
        .await;
        self.record(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_stages_need_their_flag() {
        let mut run = PipelineRun::new("/clips");
        assert!(!run.is_selected(StageKind::SilenceRemoval));
        assert!(!run.is_selected(StageKind::Upload));
        assert!(run.is_selected(StageKind::Transcript));

        run.remove_silence = true;
        run.skip.insert(StageKind::Seo);
        assert!(run.is_selected(StageKind::SilenceRemoval));
        assert!(!run.is_selected(StageKind::Seo));
    }

    #[test]
    fn construction_does_not_create_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let run = PipelineRun::new(dir.path());
        assert_eq!(run.output_dir, dir.path().join("output"));
        assert!(!run.output_dir.exists());
        assert_eq!(run.video_path(), dir.path().join("output").join("concatenated.mp4"));
    }
}
