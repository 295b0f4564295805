//! LLM-written copy: descriptions, SEO keywords and social posts.

use std::path::{Path, PathBuf};

use crate::{
    chapters::{self, Chapter, TIMESTAMPS_FILE_NAME},
    config::Link,
    error::{PipelineError, Result},
    llm::{ChatRequest, strip_code_fence},
    metadata::{ArtifactValue, MetadataStore},
    paths,
    stages::{Capabilities, Stage, StageKind, StageOutput, transcript::load_transcript},
    types::Transcription,
};

pub const DESCRIPTION_FILE_NAME: &str = "description.md";
pub const KEYWORDS_FILE_NAME: &str = "keywords.txt";
const TRANSCRIPT_LIMIT: usize = 20_000;
const TWEET_LIMIT: usize = 280;

static DESCRIPTION_PROMPT: &str = r#"You write video descriptions for YouTube and video platforms.

Write 2-3 short paragraphs that tell a viewer what the video covers and why it is
worth watching. Use the speaker's own terminology. Plain markdown paragraphs only:
no headings, no title, no links, no timestamps, no hashtags."#;

static SEO_PROMPT: &str = r#"You pick search keywords for online videos.

Return 15-25 keywords and short keyphrases a viewer would search for to find this
video, most important first. Output ONLY a single comma-separated line."#;

static LINKEDIN_PROMPT: &str = r#"You write LinkedIn posts announcing new videos.

Write a post of 120-200 words: a hook in the first line, 3-4 concrete takeaways
from the video, and a closing line inviting people to watch. Professional but
personal tone, at most 3 hashtags at the end. Output only the post."#;

static TWITTER_PROMPT: &str = r#"You write posts for X/Twitter announcing new videos.

Write one post of at most 280 characters that makes people want to watch. One
concrete hook from the video, at most 2 hashtags. Output only the post."#;

#[derive(Debug, Clone)]
pub struct ContentOutput {
    pub path: PathBuf,
    pub content: String,
    pub warnings: Vec<String>,
}

impl StageOutput for ContentOutput {
    fn artifacts(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent().unwrap_or(Path::new(".")).join(name)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str(" ...");
    cut
}

/// Explicit title, else the title recorded by concat, else a placeholder.
async fn resolve_title(explicit: Option<&str>, dir: &Path) -> String {
    if let Some(title) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    MetadataStore::load(dir)
        .await
        .text("title")
        .unwrap_or_else(|| "Untitled video".to_string())
}

async fn generate(caps: &Capabilities, request: ChatRequest) -> Result<String> {
    let what = request.command;
    let content = caps
        .retry
        .run(what, || caps.text.complete(request.clone()))
        .await?;
    Ok(strip_code_fence(&content).to_string())
}

fn transcript_prompt(title: &str, transcription: &Transcription) -> String {
    format!(
        "Video title: {title}\n\nTranscript:\n{}",
        truncate_chars(transcription.text.trim(), TRANSCRIPT_LIMIT)
    )
}

/// Markdown description. The chapters section is present only when chapters loaded.
pub fn assemble_description(
    title: &str,
    body: &str,
    links: &[Link],
    code_link: Option<&str>,
    chapters: Option<&[Chapter]>,
) -> String {
    let mut out = format!("# {title}\n\n{}\n", body.trim());

    let mut link_lines: Vec<String> = Vec::new();
    if let Some(code) = code_link.map(str::trim).filter(|c| !c.is_empty()) {
        link_lines.push(format!("- [Code]({code})"));
    }
    link_lines.extend(links.iter().map(|l| format!("- [{}]({})", l.description, l.url)));
    if !link_lines.is_empty() {
        out.push_str("\n## Links\n\n");
        out.push_str(&link_lines.join("\n"));
        out.push('\n');
    }

    if let Some(chapters) = chapters.filter(|c| !c.is_empty()) {
        out.push_str("\n## Timestamps\n\n");
        out.push_str(&chapters::chapter_lines(chapters));
        out.push('\n');
    }
    out
}

pub struct DescriptionStage {
    pub transcript: PathBuf,
    /// Defaults to `timestamps.json` beside the transcript. Optional either way.
    pub timestamps: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    pub links: Vec<Link>,
    pub code_link: Option<String>,
}

impl DescriptionStage {
    pub fn new(transcript: impl Into<PathBuf>) -> Self {
        Self {
            transcript: transcript.into(),
            timestamps: None,
            output: None,
            title: None,
            links: Vec::new(),
            code_link: None,
        }
    }

    pub fn output_location(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| sibling(&self.transcript, DESCRIPTION_FILE_NAME))
    }
}

impl Stage for DescriptionStage {
    const KIND: StageKind = StageKind::Description;
    type Output = ContentOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<ContentOutput> {
        let transcription = load_transcript(&self.transcript).await?;
        let dir = self.transcript.parent().unwrap_or(Path::new("."));
        let title = resolve_title(self.title.as_deref(), dir).await;

        let timestamps_path = self
            .timestamps
            .clone()
            .unwrap_or_else(|| sibling(&self.transcript, TIMESTAMPS_FILE_NAME));
        let chapters = chapters::load_timestamps(&timestamps_path).await;
        let mut warnings = Vec::new();
        if chapters.is_none() {
            warnings.push("no usable timestamps, description has no chapters".to_string());
        }

        let mut user = transcript_prompt(&title, &transcription);
        if let Some(chapters) = &chapters {
            user.push_str("\n\nChapters:\n");
            user.push_str(&chapters::chapter_lines(chapters));
        }
        let body = generate(caps, ChatRequest::new("description", DESCRIPTION_PROMPT, user)).await?;

        let content = assemble_description(
            &title,
            &body,
            &self.links,
            self.code_link.as_deref(),
            chapters.as_deref(),
        );
        let out = self.output_location();
        paths::write_atomic(&out, &content).await?;
        if let Some(dir) = out.parent() {
            MetadataStore::merge_write(dir, "description", ArtifactValue::text(content.clone())).await?;
        }

        Ok(ContentOutput {
            path: out,
            content,
            warnings,
        })
    }
}

pub struct SeoStage {
    /// Defaults to `description.md` beside the transcript.
    pub description: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
    pub links: Vec<Link>,
    /// Passed on to a description generated on the way.
    pub code_link: Option<String>,
}

impl SeoStage {
    pub fn description_location(&self) -> Option<PathBuf> {
        self.description.clone().or_else(|| {
            self.transcript
                .as_deref()
                .map(|t| sibling(t, DESCRIPTION_FILE_NAME))
        })
    }

    async fn description_text(&self, caps: &Capabilities, path: &Path) -> Result<(String, bool)> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) if !text.trim().is_empty() => return Ok((text, false)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let Some(transcript) = &self.transcript else {
            return Err(PipelineError::dependency_missing(
                format!("description {}", path.display()),
                "Run `vidpipe description <transcript>` first.",
            ));
        };
        tracing::info!("no description yet, generating one first");
        let stage = DescriptionStage {
            transcript: transcript.clone(),
            timestamps: None,
            output: Some(path.to_path_buf()),
            title: self.title.clone(),
            links: self.links.clone(),
            code_link: self.code_link.clone(),
        };
        Ok((stage.execute(caps).await?.content, true))
    }
}

impl Stage for SeoStage {
    const KIND: StageKind = StageKind::Seo;
    type Output = ContentOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<ContentOutput> {
        let description_path = self.description_location().ok_or_else(|| {
            PipelineError::dependency_missing(
                "description",
                "Pass a description file or a transcript to generate one from.",
            )
        })?;
        let (description, generated) = self.description_text(caps, &description_path).await?;

        let raw = generate(
            caps,
            ChatRequest::new("seo", SEO_PROMPT, description).temperature(0.3),
        )
        .await?;
        let keywords = normalize_keywords(&raw);
        if keywords.is_empty() {
            return Err(PipelineError::external("chat-completions", "returned no keywords"));
        }

        let out = self
            .output
            .clone()
            .unwrap_or_else(|| sibling(&description_path, KEYWORDS_FILE_NAME));
        paths::write_atomic(&out, &format!("{keywords}\n")).await?;
        if let Some(dir) = out.parent() {
            MetadataStore::merge_write(dir, "keywords", ArtifactValue::text(keywords.clone())).await?;
        }

        let mut warnings = Vec::new();
        if generated {
            warnings.push(format!("generated {}", description_path.display()));
        }
        Ok(ContentOutput {
            path: out,
            content: keywords,
            warnings,
        })
    }
}

/// One comma-separated line, trimmed, without duplicates or list markers.
pub fn normalize_keywords(raw: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    raw.split([',', '\n'])
        .map(|k| k.trim().trim_start_matches(['-', '*', '#']).trim().trim_matches('"'))
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialPlatform {
    LinkedIn,
    Twitter,
}

impl SocialPlatform {
    pub fn command(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => "linkedin",
            SocialPlatform::Twitter => "twitter",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => "linkedin_post.md",
            SocialPlatform::Twitter => "twitter_post.md",
        }
    }

    pub fn metadata_key(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => "linkedin_post",
            SocialPlatform::Twitter => "twitter_post",
        }
    }

    fn prompt(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => LINKEDIN_PROMPT,
            SocialPlatform::Twitter => TWITTER_PROMPT,
        }
    }
}

pub struct SocialStage {
    pub platform: SocialPlatform,
    pub transcript: PathBuf,
    pub output: Option<PathBuf>,
    pub title: Option<String>,
}

impl SocialStage {
    pub fn new(platform: SocialPlatform, transcript: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            transcript: transcript.into(),
            output: None,
            title: None,
        }
    }

    pub fn output_location(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| sibling(&self.transcript, self.platform.file_name()))
    }
}

impl Stage for SocialStage {
    const KIND: StageKind = StageKind::Social;
    type Output = ContentOutput;

    async fn execute(&self, caps: &Capabilities) -> Result<ContentOutput> {
        let transcription = load_transcript(&self.transcript).await?;
        let dir = self.transcript.parent().unwrap_or(Path::new("."));
        let title = resolve_title(self.title.as_deref(), dir).await;

        let post = generate(
            caps,
            ChatRequest::new(
                self.platform.command(),
                self.platform.prompt(),
                transcript_prompt(&title, &transcription),
            ),
        )
        .await?;

        let mut warnings = Vec::new();
        let length = post.chars().count();
        if self.platform == SocialPlatform::Twitter && length > TWEET_LIMIT {
            tracing::warn!(length, "twitter post is longer than {TWEET_LIMIT} characters");
            warnings.push(format!("post is {length} characters"));
        }

        let out = self.output_location();
        paths::write_atomic(&out, &format!("{}\n", post.trim())).await?;
        if let Some(dir) = out.parent() {
            MetadataStore::merge_write(dir, self.platform.metadata_key(), ArtifactValue::text(post.clone()))
                .await?;
        }

        Ok(ContentOutput {
            path: out,
            content: post,
            warnings,
        })
    }
}
