//! Chapter lists and the `timestamps.json` artifact.
//!
//! Chapters are contiguous: each one ends where the next starts, the first
//! starts at zero and the last ends at the media duration. Boundaries are
//! whole seconds.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::fs;

use crate::format::{format_hms, parse_timestamp};

pub const TIMESTAMPS_FILE_NAME: &str = "timestamps.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(with = "hms")]
    pub start: u64,
    #[serde(with = "hms")]
    pub end: u64,
    pub title: String,
}

mod hms {
    use super::*;

    pub fn serialize<S: Serializer>(seconds: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_hms(*seconds as f64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .map(|s| s.round() as u64)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
    }
}

/// How many chapters transcript mode should aim for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Granularity {
    Low,
    #[default]
    Medium,
    High,
}

impl Granularity {
    pub fn chapter_range(&self) -> (usize, usize) {
        match self {
            Granularity::Low => (3, 5),
            Granularity::Medium => (6, 10),
            Granularity::High => (11, 20),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Granularity::Low => "low",
            Granularity::Medium => "medium",
            Granularity::High => "high",
        })
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Granularity::Low),
            "medium" => Ok(Granularity::Medium),
            "high" => Ok(Granularity::High),
            other => Err(format!(
                "unknown granularity `{other}` (expected low, medium or high)"
            )),
        }
    }
}

/// One chapter per clip, in the given order.
pub fn chapters_from_clips(clips: &[(String, f64)]) -> Vec<Chapter> {
    let mut chapters = Vec::with_capacity(clips.len());
    let mut elapsed = 0.0;
    let mut start = 0;

    for (title, duration) in clips {
        elapsed += duration.max(0.0);
        let end = (elapsed.round() as u64).max(start);
        chapters.push(Chapter {
            start,
            end,
            title: title.clone(),
        });
        start = end;
    }
    chapters
}

/// Build contiguous chapters from proposed start times.
///
/// Starts are sorted, collapsed when they land on the same second, and any
/// start at or past the end is dropped. The first chapter is pulled to zero.
/// `None` when nothing usable remains.
pub fn chapters_from_starts(mut starts: Vec<(f64, String)>, duration: f64) -> Option<Vec<Chapter>> {
    let total = duration.max(0.0).round() as u64;
    if total == 0 {
        return None;
    }

    starts.retain(|(s, title)| s.is_finite() && *s >= 0.0 && !title.trim().is_empty());
    starts.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut firsts: Vec<(u64, String)> = Vec::new();
    for (start, title) in starts {
        let second = start.round() as u64;
        if second >= total {
            continue;
        }
        if firsts.last().is_some_and(|(prev, _)| *prev == second) {
            continue;
        }
        firsts.push((second, title.trim().to_string()));
    }

    firsts.first_mut()?.0 = 0;

    let ends: Vec<u64> = firsts
        .iter()
        .skip(1)
        .map(|(s, _)| *s)
        .chain(std::iter::once(total))
        .collect();

    Some(
        firsts
            .into_iter()
            .zip(ends)
            .map(|((start, title), end)| Chapter { start, end, title })
            .collect(),
    )
}

/// Contiguous, ordered and starting at zero.
pub fn is_contiguous(chapters: &[Chapter]) -> bool {
    let Some(first) = chapters.first() else {
        return false;
    };
    first.start == 0
        && chapters.iter().all(|c| c.start <= c.end)
        && chapters.windows(2).all(|w| w[0].end == w[1].start)
}

/// `HH:MM:SS - title` lines for descriptions.
pub fn chapter_lines(chapters: &[Chapter]) -> String {
    chapters
        .iter()
        .map(|c| format!("{} - {}", format_hms(c.start as f64), c.title))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampsFile {
    Flat(Vec<Chapter>),
    Wrapped(Vec<Wrapped>),
}

#[derive(Deserialize)]
struct Wrapped {
    timestamps: Vec<Chapter>,
}

pub fn parse_timestamps(content: &str) -> Result<Vec<Chapter>, String> {
    let parsed: TimestampsFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let chapters = match parsed {
        TimestampsFile::Flat(chapters) => chapters,
        TimestampsFile::Wrapped(blocks) => blocks.into_iter().flat_map(|b| b.timestamps).collect(),
    };
    if chapters.is_empty() {
        return Err("no chapters".to_string());
    }
    Ok(chapters)
}

/// Load chapters for optional use. Anything unreadable is logged and ignored.
pub async fn load_timestamps(path: &Path) -> Option<Vec<Chapter>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "no timestamps found, continuing without chapters");
            return None;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unable to read timestamps, continuing without chapters");
            return None;
        }
    };

    match parse_timestamps(&content) {
        Ok(chapters) => Some(chapters),
        Err(reason) => {
            tracing::warn!(path = %path.display(), %reason, "timestamps are not a chapter list, continuing without chapters");
            None
        }
    }
}
