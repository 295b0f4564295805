use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::error::{PipelineError, Result};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "flac", "ogg"];

pub const OUTPUT_DIR_NAME: &str = "output";
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const DEFAULT_CONCAT_NAME: &str = "concatenated.mp4";

/// How a stage lays out what it produces when no explicit output is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputConvention {
    /// The artifact set lives in a directory (`<input_dir>/output/` unless the stage names another).
    Directory,
    /// A single named file inside the default output directory.
    File(&'static str),
}

/// Normalize a path typed by a user.
///
/// Strips one layer of matching quotes, turns literal `\ ` into spaces, expands a
/// leading `~` and makes the result absolute. Links are resolved for whatever
/// prefix of the path exists; the path itself need not exist.
pub fn normalize(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let unquoted = strip_matching_quotes(trimmed);
    let unescaped = unquoted.replace("\\ ", " ");
    let expanded = expand_home(&unescaped);

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };

    canonicalize_lenient(&lexical_clean(&absolute))
}

fn strip_matching_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn expand_home(s: &str) -> PathBuf {
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(s));
    }
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(s)
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the rest.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }

    let mut missing = Vec::new();
    let mut cursor = path.to_path_buf();
    while let Some(name) = cursor.file_name().map(|n| n.to_os_string()) {
        missing.push(name);
        if !cursor.pop() {
            break;
        }
        if let Ok(resolved) = std::fs::canonicalize(&cursor) {
            return missing.iter().rev().fold(resolved, |acc, n| acc.join(n));
        }
    }
    path.to_path_buf()
}

/// Default output directory for an input reference: `<dir>/output` for a
/// directory, `<parent>/output` for a file.
pub fn default_output_dir(input: &Path) -> PathBuf {
    if input.is_dir() {
        input.join(OUTPUT_DIR_NAME)
    } else {
        input
            .parent()
            .unwrap_or(Path::new("."))
            .join(OUTPUT_DIR_NAME)
    }
}

/// Resolve where a stage writes. An explicit output always wins.
///
/// Never touches the filesystem beyond `is_dir` checks; creation happens at
/// first write through [`ensure_parent_dir`] or [`ensure_dir`].
pub fn resolve_output_location(
    input: &Path,
    explicit_output: Option<&Path>,
    convention: OutputConvention,
) -> PathBuf {
    if let Some(explicit) = explicit_output {
        return explicit.to_path_buf();
    }

    let output_dir = default_output_dir(input);
    match convention {
        OutputConvention::Directory => output_dir,
        OutputConvention::File(name) => output_dir.join(name),
    }
}

pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await?;
    Ok(())
}

pub fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            allowed.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn is_video(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

pub fn is_audio(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

/// List the clips of a directory in strict filename order.
///
/// Concatenation and clip-based chapters both go through here so that they
/// always agree on ordering.
pub fn list_clips(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::invalid_input(dir, "not a directory"));
    }

    let mut clips: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_video(path) && !is_partial(path))
        .collect();

    clips.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(clips)
}

/// Clips for a pipeline input: `<dir>/processed/` when silence removal left
/// clips there, otherwise `<dir>/` itself.
pub fn source_clips(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let processed = input_dir.join(PROCESSED_DIR_NAME);
    if processed.is_dir() {
        let clips = list_clips(&processed)?;
        if !clips.is_empty() {
            tracing::info!(dir = %processed.display(), "using silence-trimmed clips");
            return Ok(clips);
        }
    }

    let clips = list_clips(input_dir)?;
    if clips.is_empty() {
        return Err(PipelineError::invalid_input(
            input_dir,
            format!(
                "contains no video clips ({})",
                VIDEO_EXTENSIONS.join(", ")
            ),
        ));
    }
    Ok(clips)
}

/// Turn a video title into a safe `.mp4` file name.
pub fn title_to_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return DEFAULT_CONCAT_NAME.to_string();
    }
    if collapsed.to_lowercase().ends_with(".mp4") {
        collapsed
    } else {
        format!("{collapsed}.mp4")
    }
}

/// Whether `path` is an unfinished artifact from [`partial_path`].
pub fn is_partial(path: &Path) -> bool {
    path.file_stem()
        .map(|s| s.to_string_lossy().ends_with(".partial"))
        .unwrap_or(false)
}

/// Sibling path used while an artifact is being written: `name.partial.ext`.
///
/// The extension is kept so tools that infer the container from the name
/// still work.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let name = match final_path.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    final_path.with_file_name(name)
}

/// Write text to `path` via a temp file and rename.
pub async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dir(path).await?;
    let tmp = partial_path(path);
    if let Err(e) = fs::write(&tmp, content).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    fs::rename(&tmp, path).await?;
    Ok(())
}
