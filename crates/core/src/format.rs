use crate::types::{Segment, Transcription};

/// Format seconds as zero-padded HH:MM:SS
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Format seconds as a WebVTT cue timestamp (HH:MM:SS.mmm)
pub fn format_vtt_timestamp(seconds: f64) -> String {
    let millis = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let secs = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis % 1000
    )
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS`, each with an optional fraction.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [s] => ("0", "0", *s),
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    let hours: u64 = h.trim().parse().ok()?;
    let minutes: u64 = m.trim().parse().ok()?;
    let seconds: f64 = s.trim().replace(',', ".").parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    Some(whole as f64 + seconds)
}

/// Render transcription segments as a WebVTT document.
///
/// A transcription with text but no segments becomes one cue of `fallback_duration`.
pub fn transcription_to_vtt(transcription: &Transcription, fallback_duration: f64) -> String {
    let mut output = String::from("WEBVTT\n\n");

    let cues: Vec<&Segment> = transcription
        .segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect();

    if cues.is_empty() {
        let text = transcription.text.trim();
        if !text.is_empty() {
            output.push_str(&format!(
                "{} --> {}\n{}\n\n",
                format_vtt_timestamp(0.0),
                format_vtt_timestamp(fallback_duration),
                text
            ));
        }
        return output;
    }

    for seg in cues {
        output.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_vtt_timestamp(seg.start),
            format_vtt_timestamp(seg.end),
            seg.text.trim()
        ));
    }
    output
}

/// Parse WebVTT cues back into segments. Cue settings and identifiers are ignored.
pub fn parse_vtt(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((start, end)) = line.split_once("-->") else {
            continue;
        };
        let end = end.split_whitespace().next().unwrap_or("");
        let (Some(start), Some(end)) = (parse_timestamp(start), parse_timestamp(end)) else {
            continue;
        };

        let mut text_lines = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            text_lines.push(next.trim().to_string());
            lines.next();
        }

        if !text_lines.is_empty() {
            segments.push(Segment {
                start,
                end,
                text: text_lines.join(" "),
            });
        }
    }
    segments
}

/// Flatten segments into `HH:MM:SS — text` lines, cut at `max_chars`.
pub fn transcript_timeline(segments: &[Segment], max_chars: usize) -> String {
    let combined = segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|seg| format!("{} — {}", format_hms(seg.start), seg.text.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    if combined.chars().count() <= max_chars {
        return combined;
    }
    let mut cut: String = combined.chars().take(max_chars).collect();
    cut.push_str("\n...");
    cut
}
