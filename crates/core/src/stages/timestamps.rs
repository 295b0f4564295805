use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    chapters::{self, Chapter, Granularity, TIMESTAMPS_FILE_NAME},
    error::{PipelineError, Result},
    format::{format_hms, parse_timestamp, transcript_timeline},
    llm::{ChatRequest, strip_code_fence},
    metadata::{ArtifactValue, MetadataStore},
    paths::{self, OutputConvention},
    stages::{Capabilities, Stage, StageKind, StageOutput, file_stem, transcript::load_transcript},
    types::Transcription,
};

const TIMELINE_LIMIT: usize = 12_000;
const EXCERPT_LIMIT: usize = 400;

static CHAPTERS_PROMPT: &str = r#"You split video transcripts into chapters for viewers to navigate.

INPUT: a timeline of the transcript, one line per segment, `HH:MM:SS — text`.

OUTPUT: ONLY a JSON object of this shape:
{"chapters": [{"start": "HH:MM:SS", "title": "Short chapter title"}]}

RULES:
- The first chapter starts at 00:00:00
- Starts are taken from the timeline and strictly increase
- Chapter boundaries follow topic changes, not fixed intervals
- Titles are 2-6 words, specific to what is discussed, no numbering
- Write titles in the transcript's language"#;

static TITLES_PROMPT: &str = r#"You name video chapters. Each chapter has a working title and an
excerpt of what is said in it. Propose a clear, specific title of 2-6 words for each.

OUTPUT: ONLY a JSON object {"titles": ["...", "..."]} with exactly one title per
chapter, in the same order."#;

#[derive(Debug, Clone, PartialEq)]
pub enum TimestampMode {
    /// One chapter per clip; titles optionally refined from the transcript.
    Clips { refine_titles: bool },
    /// Chapters proposed by the LLM from the transcript.
    Transcript {
        granularity: Granularity,
        notes: Option<String>,
    },
}

impl Default for TimestampMode {
    fn default() -> Self {
        TimestampMode::Clips { refine_titles: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterSource {
    Clips,
    RefinedClips,
    Transcript,
    /// Transcript mode produced nothing usable.
    ClipsFallback,
}

impl ChapterSource {
    pub fn name(&self) -> &'static str {
        match self {
            ChapterSource::Clips => "clips",
            ChapterSource::RefinedClips => "clips+llm",
            ChapterSource::Transcript => "transcript",
            ChapterSource::ClipsFallback => "clips-fallback",
        }
    }
}

pub struct TimestampsStage {
    pub input_dir: PathBuf,
    pub output: Option<PathBuf>,
    pub mode: TimestampMode,
    pub transcript: Option<PathBuf>,
    /// The joined video, when known; its duration bounds transcript chapters.
    pub video: Option<PathBuf>,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TimestampsOutput {
    pub path: PathBuf,
    pub chapters: Vec<Chapter>,
    pub source: ChapterSource,
    pub warnings: Vec<String>,
}

impl StageOutput for TimestampsOutput {
    fn artifacts(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

impl TimestampsStage {
    pub fn new(input_dir: impl Into<PathBuf>, mode: TimestampMode) -> Self {
        Self {
            input_dir: input_dir.into(),
            output: None,
            mode,
            transcript: None,
            video: None,
            title: None,
        }
    }

    pub fn output_location(&self) -> PathBuf {
        paths::resolve_output_location(
            &self.input_dir,
            self.output.as_deref(),
            OutputConvention::File(TIMESTAMPS_FILE_NAME),
        )
    }

    async fn clip_chapters(&self, caps: &Capabilities) -> Result<Vec<Chapter>> {
        let clips = paths::source_clips(&self.input_dir)?;
        let mut durations = Vec::with_capacity(clips.len());
        for clip in &clips {
            let info = caps.media.probe(clip).await?;
            durations.push((file_stem(clip), info.duration));
        }
        Ok(chapters::chapters_from_clips(&durations))
    }

    async fn optional_transcript(&self) -> Option<Transcription> {
        let path = self.transcript.as_ref()?;
        match load_transcript(path).await {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(error = %e, "transcript unavailable, keeping clip titles");
                None
            }
        }
    }

    async fn transcript_chapters(
        &self,
        caps: &Capabilities,
        transcription: &Transcription,
        granularity: Granularity,
        notes: Option<&str>,
    ) -> Result<Option<Vec<Chapter>>> {
        let duration = match &self.video {
            Some(video) => caps.media.probe(video).await?.duration,
            None => transcription.duration(),
        };

        let (min, max) = granularity.chapter_range();
        let mut user = format!(
            "Video title: {}\nDuration: {}\nAim for {min}-{max} chapters ({granularity} granularity).\n",
            self.title.as_deref().unwrap_or("untitled"),
            format_hms(duration),
        );
        if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
            user.push_str(&format!("Notes from the author: {}\n", notes.trim()));
        }
        user.push_str("\nTimeline:\n");
        user.push_str(&transcript_timeline(&transcription.segments, TIMELINE_LIMIT));

        let request = ChatRequest::new("timestamps", CHAPTERS_PROMPT, user)
            .temperature(0.3)
            .json();
        let content = caps
            .retry
            .run("chapter extraction", || caps.text.complete(request.clone()))
            .await?;

        Ok(parse_chapter_response(&content)
            .and_then(|starts| chapters::chapters_from_starts(starts, duration)))
    }

    async fn refine_titles(
        &self,
        caps: &Capabilities,
        chapters: &[Chapter],
        transcription: &Transcription,
    ) -> Option<Vec<String>> {
        let listing = chapters
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let excerpt: String = transcription
                    .segments
                    .iter()
                    .filter(|s| s.start >= c.start as f64 && s.start < c.end as f64)
                    .map(|s| s.text.trim())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .chars()
                    .take(EXCERPT_LIMIT)
                    .collect();
                format!("{}. {} [{}]\n{}", i + 1, c.title, format_hms(c.start as f64), excerpt)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = ChatRequest::new("timestamps", TITLES_PROMPT, listing)
            .temperature(0.3)
            .json();
        let content = match caps
            .retry
            .run("chapter titles", || caps.text.complete(request.clone()))
            .await
        {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "title refinement failed, keeping clip names");
                return None;
            }
        };

        #[derive(Deserialize)]
        struct Titles {
            titles: Vec<String>,
        }
        let titles = serde_json::from_str::<Titles>(strip_code_fence(&content))
            .ok()
            .map(|t| t.titles)
            .filter(|t| t.len() == chapters.len() && t.iter().all(|s| !s.trim().is_empty()));
        if titles.is_none() {
            tracing::warn!("title refinement returned an unusable list, keeping clip names");
        }
        titles
    }
}

impl Stage for TimestampsStage {
    const KIND: StageKind = StageKind::Timestamps;
    type Output = TimestampsOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<TimestampsOutput> {
        let mut warnings = Vec::new();

        let (chapters, source) = match &self.mode {
            TimestampMode::Clips { refine_titles } => {
                let mut chapters = self.clip_chapters(caps).await?;
                let mut source = ChapterSource::Clips;
                if *refine_titles
                    && let Some(transcription) = self.optional_transcript().await
                {
                    match self.refine_titles(caps, &chapters, &transcription).await {
                        Some(titles) => {
                            for (chapter, title) in chapters.iter_mut().zip(titles) {
                                chapter.title = title.trim().to_string();
                            }
                            source = ChapterSource::RefinedClips;
                        }
                        None => warnings.push("kept clip names as chapter titles".to_string()),
                    }
                }
                (chapters, source)
            }
            TimestampMode::Transcript { granularity, notes } => {
                let path = self.transcript.as_ref().ok_or_else(|| {
                    PipelineError::dependency_missing(
                        "transcript",
                        "Run `vidpipe transcript <video>` first or pass --transcript.",
                    )
                })?;
                let transcription = load_transcript(path).await?;
                match self
                    .transcript_chapters(caps, &transcription, *granularity, notes.as_deref())
                    .await?
                {
                    Some(chapters) => (chapters, ChapterSource::Transcript),
                    None => {
                        tracing::warn!("transcript chapters unusable, falling back to one chapter per clip");
                        warnings.push("transcript chapters unusable, used clip chapters".to_string());
                        (self.clip_chapters(caps).await?, ChapterSource::ClipsFallback)
                    }
                }
            }
        };

        if chapters.is_empty() {
            return Err(PipelineError::invalid_input(&self.input_dir, "no chapters could be built"));
        }

        let out = self.output_location();
        paths::write_atomic(&out, &serde_json::to_string_pretty(&chapters)?).await?;
        if let Some(dir) = out.parent() {
            MetadataStore::merge_many(
                dir,
                vec![
                    (
                        "timestamps".to_string(),
                        ArtifactValue::data(serde_json::to_value(&chapters)?),
                    ),
                    ("chapter_source".to_string(), ArtifactValue::text(source.name())),
                ],
            )
            .await?;
        }
        tracing::info!(chapters = chapters.len(), source = source.name(), "timestamps written");

        Ok(TimestampsOutput {
            path: out,
            chapters,
            source,
            warnings,
        })
    }
}

/// Pull `(start_seconds, title)` pairs out of a chapter response.
pub fn parse_chapter_response(content: &str) -> Option<Vec<(f64, String)>> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(content)).ok()?;
    let items = value
        .get("chapters")
        .and_then(|c| c.as_array())
        .or_else(|| value.as_array())?;

    let starts: Vec<(f64, String)> = items
        .iter()
        .filter_map(|item| {
            let start = match &item["start"] {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => parse_timestamp(s),
                _ => None,
            }?;
            let title = item["title"].as_str()?.trim().to_string();
            Some((start, title))
        })
        .collect();

    (!starts.is_empty()).then_some(starts)
}
