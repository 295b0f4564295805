use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Output,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    error::{PipelineError, Result},
    types::{AudioStream, EncodeProfile, MediaInfo, TimeSpan, VideoStream},
};

/// Audio and video operations, all delegated to external tools.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Write a mono speech-friendly audio track of `video` to `out`.
    async fn extract_audio(&self, video: &Path, out: &Path) -> Result<()>;

    /// Silent spans at least `min_silence` seconds long, quieter than `noise_db`.
    async fn detect_silence(
        &self,
        input: &Path,
        min_silence: f64,
        noise_db: f64,
    ) -> Result<Vec<TimeSpan>>;

    /// Re-encode only the given spans of `input`, joined in order.
    async fn keep_segments(&self, input: &Path, spans: &[TimeSpan], out: &Path) -> Result<()>;

    async fn standardize(&self, input: &Path, profile: &EncodeProfile, out: &Path) -> Result<()>;

    /// Join inputs without re-encoding. Inputs must share codecs.
    async fn concat_copy(&self, inputs: &[PathBuf], out: &Path) -> Result<()>;

    /// Fetch a remote video into `dir`, returning the downloaded file.
    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf>;
}

/// `ffmpeg`, `ffprobe` and `yt-dlp` from `PATH`.
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg;

impl Ffmpeg {
    pub fn new() -> Self {
        Self
    }
}

async fn run_tool(tool: &str, command: &mut Command) -> Result<Output> {
    tracing::debug!(command = ?command.as_std(), "running {tool}");

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::external(tool, format!("`{tool}` was not found on PATH"))
        } else {
            PipelineError::external(tool, e.to_string())
        }
    })?;

    if !output.status.success() {
        return Err(PipelineError::external(tool, stderr_tail(&output.stderr)));
    }
    Ok(output)
}

/// Last lines of a tool's stderr; ffmpeg prints its banner first.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(8);
    lines[start..].join("\n")
}

#[async_trait]
impl MediaToolkit for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = run_tool(
            "ffprobe",
            Command::new("ffprobe")
                .arg("-v")
                .arg("error")
                .arg("-print_format")
                .arg("json")
                .arg("-show_format")
                .arg("-show_streams")
                .arg(path),
        )
        .await?;

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }

    async fn extract_audio(&self, video: &Path, out: &Path) -> Result<()> {
        run_tool(
            "ffmpeg",
            Command::new("ffmpeg")
                .arg("-y")
                .arg("-i")
                .arg(video)
                .arg("-vn")
                .arg("-ar")
                .arg("16000")
                .arg("-ac")
                .arg("1")
                .arg("-b:a")
                .arg("64k")
                .arg(out),
        )
        .await?;
        Ok(())
    }

    async fn detect_silence(
        &self,
        input: &Path,
        min_silence: f64,
        noise_db: f64,
    ) -> Result<Vec<TimeSpan>> {
        let info = self.probe(input).await?;
        let output = run_tool(
            "ffmpeg",
            Command::new("ffmpeg")
                .arg("-hide_banner")
                .arg("-i")
                .arg(input)
                .arg("-af")
                .arg(format!("silencedetect=noise={noise_db}dB:d={min_silence}"))
                .arg("-f")
                .arg("null")
                .arg("-"),
        )
        .await?;

        Ok(parse_silence_log(
            &String::from_utf8_lossy(&output.stderr),
            info.duration,
        ))
    }

    async fn keep_segments(&self, input: &Path, spans: &[TimeSpan], out: &Path) -> Result<()> {
        let info = self.probe(input).await?;
        let (filter, maps) = keep_filter(spans, info.audio.is_some());

        let mut command = Command::new("ffmpeg");
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-filter_complex")
            .arg(filter);
        for map in maps {
            command.arg("-map").arg(map);
        }
        command
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("fast")
            .arg("-crf")
            .arg("20")
            .arg("-c:a")
            .arg("aac")
            .arg(out);

        run_tool("ffmpeg", &mut command).await?;
        Ok(())
    }

    async fn standardize(&self, input: &Path, profile: &EncodeProfile, out: &Path) -> Result<()> {
        let info = self.probe(input).await?;
        let scale = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}",
            w = profile.width,
            h = profile.height,
            fps = profile.fps
        );

        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg(input);
        if info.audio.is_none() {
            // Silent clips get a silent track so every clip has the same streams.
            command
                .arg("-f")
                .arg("lavfi")
                .arg("-i")
                .arg(format!(
                    "anullsrc=r={}:cl=stereo",
                    profile.audio_sample_rate
                ))
                .arg("-shortest");
        }
        command
            .arg("-map")
            .arg("0:v:0")
            .arg("-map")
            .arg(if info.audio.is_some() { "0:a:0" } else { "1:a:0" })
            .arg("-vf")
            .arg(scale)
            .arg("-c:v")
            .arg(profile.video_codec)
            .arg("-preset")
            .arg("medium")
            .arg("-crf")
            .arg("23")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-c:a")
            .arg(profile.audio_codec)
            .arg("-ar")
            .arg(profile.audio_sample_rate.to_string())
            .arg("-ac")
            .arg("2")
            .arg(out);

        run_tool("ffmpeg", &mut command).await?;
        Ok(())
    }

    async fn concat_copy(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        let mut list = tempfile::Builder::new()
            .prefix("vidpipe-concat-")
            .suffix(".txt")
            .tempfile()?;
        list.write_all(concat_list(inputs).as_bytes())?;
        list.flush()?;

        run_tool(
            "ffmpeg",
            Command::new("ffmpeg")
                .arg("-y")
                .arg("-f")
                .arg("concat")
                .arg("-safe")
                .arg("0")
                .arg("-i")
                .arg(list.path())
                .arg("-c")
                .arg("copy")
                .arg(out),
        )
        .await?;
        Ok(())
    }

    async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf> {
        let output_template = dir.join("%(title)s.%(ext)s");
        let output = run_tool(
            "yt-dlp",
            Command::new("yt-dlp")
                .arg(url)
                .arg("--print")
                .arg("after_move:filepath")
                .arg("-f")
                .arg("bv*+ba/b")
                .arg("--merge-output-format")
                .arg("mp4")
                .arg("-o")
                .arg(&output_template),
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let filepath = stdout.lines().rev().find(|l| !l.trim().is_empty());
        match filepath {
            Some(path) => Ok(PathBuf::from(path.trim())),
            None => Err(PipelineError::external(
                "yt-dlp",
                "finished without reporting a file path",
            )),
        }
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe(json: &str) -> Result<MediaInfo> {
    let value: serde_json::Value = serde_json::from_str(json)?;

    let duration = value["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| PipelineError::external("ffprobe", "no duration in probe output"))?;
    let size_bytes = value["format"]["size"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let streams = value["streams"].as_array().cloned().unwrap_or_default();
    let first = |kind: &str| streams.iter().find(|s| s["codec_type"] == kind).cloned();

    let video = first("video").map(|s| VideoStream {
        codec: s["codec_name"].as_str().unwrap_or_default().to_string(),
        width: s["width"].as_u64().unwrap_or(0) as u32,
        height: s["height"].as_u64().unwrap_or(0) as u32,
        frame_rate: s["r_frame_rate"].as_str().unwrap_or_default().to_string(),
    });
    let audio = first("audio").map(|s| AudioStream {
        codec: s["codec_name"].as_str().unwrap_or_default().to_string(),
        sample_rate: s["sample_rate"]
            .as_str()
            .and_then(|r| r.parse().ok())
            .unwrap_or(0),
        channels: s["channels"].as_u64().unwrap_or(0) as u32,
    });

    Ok(MediaInfo {
        duration,
        size_bytes,
        video,
        audio,
    })
}

/// Read `silence_start` / `silence_end` pairs from silencedetect's log.
/// A silence still open at the end of the file closes at `duration`.
pub fn parse_silence_log(log: &str, duration: f64) -> Vec<TimeSpan> {
    let mut spans = Vec::new();
    let mut open: Option<f64> = None;

    for line in log.lines() {
        if let Some(rest) = line.split("silence_start:").nth(1) {
            open = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.split("silence_end:").nth(1)
            && let Some(end) = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok())
        {
            let start = open.take().unwrap_or(0.0);
            spans.push(TimeSpan::new(start.max(0.0), end));
        }
    }
    if let Some(start) = open
        && start < duration
    {
        spans.push(TimeSpan::new(start.max(0.0), duration));
    }
    spans
}

/// Filter graph keeping `spans`, plus the `-map` targets for its outputs.
pub fn keep_filter(spans: &[TimeSpan], has_audio: bool) -> (String, Vec<String>) {
    let mut graph = String::new();
    let mut inputs = String::new();

    for (i, span) in spans.iter().enumerate() {
        graph.push_str(&format!(
            "[0:v]trim=start={:.3}:end={:.3},setpts=PTS-STARTPTS[v{i}];",
            span.start, span.end
        ));
        inputs.push_str(&format!("[v{i}]"));
        if has_audio {
            graph.push_str(&format!(
                "[0:a]atrim=start={:.3}:end={:.3},asetpts=PTS-STARTPTS[a{i}];",
                span.start, span.end
            ));
            inputs.push_str(&format!("[a{i}]"));
        }
    }

    let n = spans.len();
    if has_audio {
        graph.push_str(&format!("{inputs}concat=n={n}:v=1:a=1[outv][outa]"));
        (graph, vec!["[outv]".to_string(), "[outa]".to_string()])
    } else {
        graph.push_str(&format!("{inputs}concat=n={n}:v=1:a=0[outv]"));
        (graph, vec!["[outv]".to_string()])
    }
}

/// Concat demuxer list with single quotes escaped.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}
