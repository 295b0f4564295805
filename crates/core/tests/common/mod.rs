#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use vidpipe_core::{
    Capabilities, ChatRequest, MediaInfo, MediaToolkit, PipelineError, Result, RetryPolicy,
    Segment, SpeechToText, TextGenerator, Transcription,
    types::{AudioStream, EncodeProfile, TimeSpan, VideoStream},
};

/// Media toolkit that writes small marker files instead of running ffmpeg.
#[derive(Default)]
pub struct FakeMedia {
    /// Duration per file name; unknown files are 10s long.
    pub durations: HashMap<String, f64>,
    /// Video codec per file name; unknown files are h264.
    pub codecs: HashMap<String, String>,
    pub silences: Vec<TimeSpan>,
    /// File names whose silence detection fails.
    pub failing: HashSet<String>,
    pub extracted_audio: Mutex<Vec<PathBuf>>,
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl FakeMedia {
    pub fn with_durations(durations: &[(&str, f64)]) -> Self {
        Self {
            durations: durations
                .iter()
                .map(|(n, d)| (n.to_string(), *d))
                .collect(),
            ..Default::default()
        }
    }

    fn duration_of(&self, path: &Path) -> f64 {
        let name = name_of(path);
        if let Some(d) = self.durations.get(&name) {
            return *d;
        }
        // Joined outputs carry the summed duration in their contents.
        std::fs::read_to_string(path)
            .ok()
            .and_then(|c| c.strip_prefix("joined:").and_then(|d| d.trim().parse().ok()))
            .unwrap_or(10.0)
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(PipelineError::external("ffprobe", format!("{}: No such file", path.display())));
        }
        let name = name_of(path);
        Ok(MediaInfo {
            duration: self.duration_of(path),
            size_bytes: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            video: Some(VideoStream {
                codec: self.codecs.get(&name).cloned().unwrap_or_else(|| "h264".into()),
                width: 1920,
                height: 1080,
                frame_rate: "30/1".into(),
            }),
            audio: Some(AudioStream {
                codec: "aac".into(),
                sample_rate: 48000,
                channels: 2,
            }),
        })
    }

    async fn extract_audio(&self, _video: &Path, out: &Path) -> Result<()> {
        std::fs::write(out, b"audio")?;
        self.extracted_audio.lock().unwrap().push(out.to_path_buf());
        Ok(())
    }

    async fn detect_silence(&self, input: &Path, _min: f64, _noise: f64) -> Result<Vec<TimeSpan>> {
        if self.failing.contains(&name_of(input)) {
            return Err(PipelineError::external("ffmpeg", "Invalid data found when processing input"));
        }
        Ok(self.silences.clone())
    }

    async fn keep_segments(&self, input: &Path, spans: &[TimeSpan], out: &Path) -> Result<()> {
        std::fs::write(out, format!("trimmed {} into {} spans", name_of(input), spans.len()))?;
        Ok(())
    }

    async fn standardize(&self, input: &Path, _profile: &EncodeProfile, out: &Path) -> Result<()> {
        std::fs::write(out, format!("joined:{}", self.duration_of(input)))?;
        Ok(())
    }

    async fn concat_copy(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        let total: f64 = inputs.iter().map(|p| self.duration_of(p)).sum();
        std::fs::write(out, format!("joined:{total}"))?;
        Ok(())
    }

    async fn download(&self, _url: &str, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("downloaded.mp4");
        std::fs::write(&path, b"video")?;
        Ok(path)
    }
}

/// Speech-to-text that fails with HTTP 503 a set number of times first.
pub struct FakeSpeech {
    pub fail_first: u32,
    pub calls: AtomicU32,
    /// Whether the audio file existed at each call.
    pub audio_present: Mutex<Vec<bool>>,
}

impl FakeSpeech {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
            audio_present: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn sample_transcription() -> Transcription {
    Transcription {
        text: "Welcome to the course. Today we build a parser.".into(),
        language: "en".into(),
        segments: vec![
            Segment {
                start: 0.0,
                end: 4.5,
                text: " Welcome to the course.".into(),
            },
            Segment {
                start: 30.0,
                end: 55.0,
                text: " Today we build a parser.".into(),
            },
        ],
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(&self, audio: &Path) -> Result<Transcription> {
        self.audio_present.lock().unwrap().push(audio.exists());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(PipelineError::external("speech-to-text", "HTTP 503: service unavailable"));
        }
        Ok(sample_transcription())
    }
}

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String> + Send + Sync>;

/// Text generator answering from a closure and recording every request.
pub struct FakeText {
    responder: Responder,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeText {
    pub fn new(responder: impl Fn(&ChatRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plausible answers for every command.
    pub fn canned() -> Self {
        Self::new(|req| Ok(canned_answer(req)))
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.requests.lock().unwrap().iter().map(|r| r.command).collect()
    }
}

pub fn canned_answer(req: &ChatRequest) -> String {
    match req.command {
        "timestamps" if req.system.contains("\"titles\"") => {
            r#"{"titles": ["Course welcome", "Building the parser"]}"#.to_string()
        }
        "timestamps" => {
            r#"{"chapters": [{"start": "00:00:00", "title": "Welcome"}, {"start": "00:00:30", "title": "Parser"}]}"#
                .to_string()
        }
        "description" => "In this video we build a parser from scratch.".to_string(),
        "seo" => "parser, rust, compilers, Parser".to_string(),
        "linkedin" => "New video: building a parser.".to_string(),
        "twitter" => "Built a parser today. #rust".to_string(),
        other => format!("unexpected command {other}"),
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(&request)
    }
}

pub struct Harness {
    pub media: Arc<FakeMedia>,
    pub speech: Arc<FakeSpeech>,
    pub text: Arc<FakeText>,
    pub caps: Capabilities,
}

impl Harness {
    pub fn new(media: FakeMedia, speech: FakeSpeech, text: FakeText) -> Self {
        let media = Arc::new(media);
        let speech = Arc::new(speech);
        let text = Arc::new(text);
        let caps = Capabilities {
            media: media.clone(),
            speech: speech.clone(),
            text: text.clone(),
            retry: RetryPolicy::no_delay(3),
        };
        Self {
            media,
            speech,
            text,
            caps,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            FakeMedia::with_durations(&[("01-intro.mp4", 30.0), ("02-body.mp4", 25.0)]),
            FakeSpeech::new(0),
            FakeText::canned(),
        )
    }
}

/// `clips/` with `01-intro.mp4` and `02-body.mp4`.
pub fn clip_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let clips = dir.path().join("clips");
    std::fs::create_dir(&clips).unwrap();
    std::fs::write(clips.join("01-intro.mp4"), b"intro").unwrap();
    std::fs::write(clips.join("02-body.mp4"), b"body").unwrap();
    dir
}

pub const SAMPLE_VTT: &str = "WEBVTT\n\n00:00:00.000 --> 00:00:04.500\nWelcome to the course.\n\n00:00:30.000 --> 00:00:55.000\nToday we build a parser.\n\n";
