pub mod chapters;
pub mod config;
pub mod error;
pub mod format;
pub mod llm;
pub mod media;
pub mod metadata;
pub mod orchestrator;
pub mod paths;
pub mod provider;
pub mod retry;
pub mod speech;
pub mod stages;
pub mod types;

pub use chapters::{Chapter, Granularity};
pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use llm::{ChatClient, ChatRequest, TextGenerator};
pub use media::{Ffmpeg, MediaToolkit};
pub use metadata::{ArtifactValue, MetadataRecord, MetadataStore};
pub use orchestrator::{Orchestrator, PipelineReport, PipelineRun, RunObserver, RunState};
pub use provider::{Provider, ProviderConfig};
pub use retry::RetryPolicy;
pub use speech::{SpeechToText, WhisperApi};
pub use stages::{Capabilities, Stage, StageKind, StageResult, StageStatus};
pub use types::{MediaInfo, Segment, Transcription};
