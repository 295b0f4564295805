mod common;

use common::*;
use vidpipe_core::{
    MetadataStore, PipelineError, Stage,
    stages::{
        ConcatStage, DescriptionStage, SeoStage, SilenceStage, SocialPlatform, SocialStage,
        TimestampMode, TimestampsStage, TranscriptStage,
    },
    chapters::Granularity,
    types::TimeSpan,
};

#[tokio::test]
async fn clips_mode_matches_cumulative_durations() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");

    let output = TimestampsStage::new(&clips, TimestampMode::Clips { refine_titles: false })
        .execute(&h.caps)
        .await
        .unwrap();

    assert_eq!(output.path, clips.join("output").join("timestamps.json"));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output.path).unwrap()).unwrap();
    assert_eq!(
        written,
        serde_json::json!([
            {"start": "00:00:00", "end": "00:00:30", "title": "01-intro"},
            {"start": "00:00:30", "end": "00:00:55", "title": "02-body"}
        ])
    );
    assert!(h.text.commands().is_empty());
}

#[tokio::test]
async fn clip_titles_are_refined_from_transcript() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();

    let mut stage = TimestampsStage::new(&clips, TimestampMode::Clips { refine_titles: true });
    stage.transcript = Some(transcript);
    let output = stage.execute(&h.caps).await.unwrap();

    let titles: Vec<_> = output.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Course welcome", "Building the parser"]);
    assert_eq!(output.chapters[1].start, 30);
}

#[tokio::test]
async fn transcript_mode_keeps_chapters_contiguous() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();

    let mut stage = TimestampsStage::new(
        &clips,
        TimestampMode::Transcript {
            granularity: Granularity::Low,
            notes: Some("focus on the parser".into()),
        },
    );
    stage.transcript = Some(transcript);
    let output = stage.execute(&h.caps).await.unwrap();

    assert_eq!(output.chapters.len(), 2);
    assert_eq!(output.chapters[0].start, 0);
    assert_eq!(output.chapters[0].end, output.chapters[1].start);
    assert_eq!(output.chapters[1].end, 55);

    let requests = h.text.requests.lock().unwrap();
    assert!(requests[0].json);
    assert!(requests[0].user.contains("3-5 chapters"));
    assert!(requests[0].user.contains("focus on the parser"));
}

#[tokio::test]
async fn unusable_chapter_response_falls_back_to_clips() {
    let dir = clip_dir();
    let h = Harness::new(
        FakeMedia::with_durations(&[("01-intro.mp4", 30.0), ("02-body.mp4", 25.0)]),
        FakeSpeech::new(0),
        FakeText::new(|_| Ok("I could not find any chapters, sorry.".to_string())),
    );
    let clips = dir.path().join("clips");
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();

    let mut stage = TimestampsStage::new(
        &clips,
        TimestampMode::Transcript {
            granularity: Granularity::Medium,
            notes: None,
        },
    );
    stage.transcript = Some(transcript);
    let output = stage.execute(&h.caps).await.unwrap();

    assert_eq!(output.source.name(), "clips-fallback");
    assert_eq!(output.chapters[0].title, "01-intro");
    assert!(!output.warnings.is_empty());
}

#[tokio::test]
async fn transcript_mode_without_transcript_is_dependency_missing() {
    let dir = clip_dir();
    let h = Harness::standard();
    let err = TimestampsStage::new(
        dir.path().join("clips"),
        TimestampMode::Transcript {
            granularity: Granularity::High,
            notes: None,
        },
    )
    .execute(&h.caps)
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::DependencyMissing { .. }));
}

#[tokio::test]
async fn transcription_survives_two_transient_failures() {
    let dir = clip_dir();
    let h = Harness::new(FakeMedia::default(), FakeSpeech::new(2), FakeText::canned());
    let video = dir.path().join("clips").join("01-intro.mp4");

    let output = TranscriptStage::new(&video).execute(&h.caps).await.unwrap();

    assert_eq!(h.speech.calls(), 3);
    let vtt = std::fs::read_to_string(&output.path).unwrap();
    assert!(vtt.starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:04.500\nWelcome to the course.\n"));

    let extracted = h.media.extracted_audio.lock().unwrap().clone();
    assert_eq!(extracted.len(), 1);
    assert!(!extracted[0].exists());
    assert!(h.speech.audio_present.lock().unwrap().iter().all(|present| *present));

    let record = MetadataStore::load(output.path.parent().unwrap()).await;
    assert!(record.text("transcript").unwrap().contains("parser"));
    assert_eq!(record.path("transcript_path"), Some(output.path.clone()));
}

#[tokio::test]
async fn temp_audio_is_removed_when_transcription_fails() {
    let dir = clip_dir();
    let h = Harness::new(FakeMedia::default(), FakeSpeech::new(10), FakeText::canned());
    let video = dir.path().join("clips").join("01-intro.mp4");
    let stage = TranscriptStage::new(&video);

    let err = stage.execute(&h.caps).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(h.speech.calls(), 3);
    let extracted = h.media.extracted_audio.lock().unwrap().clone();
    assert!(!extracted[0].exists());
    assert!(!stage.output_location().exists());
}

#[tokio::test]
async fn transcript_rerun_overwrites_with_same_output() {
    let dir = clip_dir();
    let h = Harness::standard();
    let video = dir.path().join("clips").join("01-intro.mp4");
    let out = dir.path().join("custom").join("talk.vtt");

    let stage = TranscriptStage::new(&video).output(Some(out.clone()));
    stage.execute(&h.caps).await.unwrap();
    let first = std::fs::read_to_string(&out).unwrap();
    stage.execute(&h.caps).await.unwrap();
    let second = std::fs::read_to_string(&out).unwrap();

    assert_eq!(first, second);
    assert!(!dir.path().join("clips").join("output").exists());
}

#[tokio::test]
async fn silence_rerun_is_idempotent() {
    let dir = clip_dir();
    let mut media = FakeMedia::default();
    media.silences = vec![TimeSpan::new(2.0, 5.0)];
    let h = Harness::new(media, FakeSpeech::new(0), FakeText::canned());
    let video = dir.path().join("clips").join("01-intro.mp4");
    let out = dir.path().join("clean.mp4");

    let stage = SilenceStage::new(&video).output(Some(out.clone()));
    let first = stage.execute(&h.caps).await.unwrap();
    let first_content = std::fs::read_to_string(&out).unwrap();
    let second = stage.execute(&h.caps).await.unwrap();

    assert_eq!(first.succeeded, second.succeeded);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), first_content);
    assert!(!dir.path().join("clean.partial.mp4").exists());
}

#[tokio::test]
async fn silence_batch_continues_past_a_failing_clip() {
    let dir = clip_dir();
    let mut media = FakeMedia::default();
    media.silences = vec![TimeSpan::new(2.0, 5.0)];
    media.failing.insert("01-intro.mp4".to_string());
    let h = Harness::new(media, FakeSpeech::new(0), FakeText::canned());
    let clips = dir.path().join("clips");

    let report = SilenceStage::new(&clips).execute(&h.caps).await.unwrap();

    assert_eq!(report.succeeded, vec![clips.join("processed").join("02-body.mp4")]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].0.ends_with("01-intro.mp4"));
    assert!(!clips.join("processed").join("01-intro.mp4").exists());
}

#[tokio::test]
async fn fast_concat_rejects_mismatched_codecs() {
    let dir = clip_dir();
    let mut media = FakeMedia::default();
    media.codecs.insert("02-body.mp4".into(), "hevc".into());
    let h = Harness::new(media, FakeSpeech::new(0), FakeText::canned());
    let mut stage = ConcatStage::new(dir.path().join("clips"));
    stage.fast = true;

    let err = stage.execute(&h.caps).await.unwrap_err();

    assert!(matches!(err, PipelineError::IncompatibleInputs { .. }));
    assert!(err.to_string().contains("hevc"));
    let out = stage.output_location();
    assert!(!out.exists());
    assert!(!out.parent().unwrap().exists());
}

#[tokio::test]
async fn standard_concat_records_metadata() {
    let dir = clip_dir();
    let h = Harness::standard();
    let mut stage = ConcatStage::new(dir.path().join("clips"));
    stage.title = Some("Parser course".into());

    let output = stage.execute(&h.caps).await.unwrap();

    assert_eq!(output.video.file_name().unwrap(), "Parser course.mp4");
    assert_eq!(output.duration, 55.0);
    let record = MetadataStore::load(output.video.parent().unwrap()).await;
    assert_eq!(record.text("title").as_deref(), Some("Parser course"));
    assert_eq!(record.text("concat_mode").as_deref(), Some("standard"));
    assert_eq!(record.path("video"), Some(output.video.clone()));
    assert!(record.contains("file_size_bytes"));
}

#[tokio::test]
async fn description_without_timestamps_is_degraded_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let h = Harness::standard();

    let mut stage = DescriptionStage::new(&transcript);
    stage.title = Some("Parsers".into());
    let output = stage.execute(&h.caps).await.unwrap();

    assert!(!output.content.trim().is_empty());
    assert!(output.content.starts_with("# Parsers\n\n"));
    assert!(!output.content.contains("## Timestamps"));
    assert_eq!(output.path, dir.path().join("description.md"));
}

#[tokio::test]
async fn invalid_timestamps_give_the_same_degraded_description() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let h = Harness::standard();

    let mut stage = DescriptionStage::new(&transcript);
    stage.title = Some("Parsers".into());
    let without = stage.execute(&h.caps).await.unwrap();

    std::fs::write(dir.path().join("timestamps.json"), "[{\"start\": oops").unwrap();
    let with_invalid = stage.execute(&h.caps).await.unwrap();

    assert_eq!(without.content, with_invalid.content);
    assert!(!with_invalid.warnings.is_empty());
}

#[tokio::test]
async fn valid_timestamps_add_chapter_section() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    std::fs::write(
        dir.path().join("timestamps.json"),
        r#"[{"start":"00:00:00","end":"00:00:30","title":"Intro"},{"start":"00:00:30","end":"00:00:55","title":"Parser"}]"#,
    )
    .unwrap();
    let h = Harness::standard();

    let output = DescriptionStage::new(&transcript).execute(&h.caps).await.unwrap();

    assert!(output.content.contains("## Timestamps\n\n00:00:00 - Intro\n00:00:30 - Parser\n"));
    let record = MetadataStore::load(dir.path()).await;
    assert_eq!(record.text("description"), Some(output.content));
}

#[tokio::test]
async fn description_without_transcript_names_the_fix() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::standard();
    let err = DescriptionStage::new(dir.path().join("transcript.vtt"))
        .execute(&h.caps)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DependencyMissing { .. }));
}

#[tokio::test]
async fn seo_generates_missing_description_first() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let h = Harness::standard();

    let output = SeoStage {
        description: None,
        transcript: Some(transcript),
        output: None,
        title: Some("Parsers".into()),
        links: Vec::new(),
        code_link: None,
    }
    .execute(&h.caps)
    .await
    .unwrap();

    assert_eq!(output.path, dir.path().join("keywords.txt"));
    assert_eq!(output.content, "parser, rust, compilers");
    assert!(dir.path().join("description.md").is_file());
    assert_eq!(h.text.commands(), vec!["description", "seo"]);
}

#[tokio::test]
async fn seo_keeps_code_link_in_generated_description() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let h = Harness::standard();

    SeoStage {
        description: None,
        transcript: Some(transcript),
        output: None,
        title: Some("Parsers".into()),
        links: Vec::new(),
        code_link: Some("https://example.com/parser".into()),
    }
    .execute(&h.caps)
    .await
    .unwrap();

    let description = std::fs::read_to_string(dir.path().join("description.md")).unwrap();
    assert!(description.contains("## Links\n\n- [Code](https://example.com/parser)"));
}

#[tokio::test]
async fn concat_ignores_leftover_partial_clips() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");
    let processed = clips.join("processed");
    std::fs::create_dir(&processed).unwrap();
    std::fs::write(processed.join("01-intro.mp4"), b"intro").unwrap();
    std::fs::write(processed.join("02-body.partial.mp4"), b"half").unwrap();

    let output = ConcatStage::new(&clips).execute(&h.caps).await.unwrap();

    let names: Vec<_> = output.clips.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["01-intro"]);
    assert_eq!(output.duration, 30.0);
}

#[tokio::test]
async fn social_posts_go_to_platform_files() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let h = Harness::standard();

    let linkedin = SocialStage::new(SocialPlatform::LinkedIn, &transcript)
        .execute(&h.caps)
        .await
        .unwrap();
    let twitter = SocialStage::new(SocialPlatform::Twitter, &transcript)
        .execute(&h.caps)
        .await
        .unwrap();

    assert_eq!(linkedin.path, dir.path().join("linkedin_post.md"));
    assert_eq!(twitter.path, dir.path().join("twitter_post.md"));
    let record = MetadataStore::load(dir.path()).await;
    assert!(record.contains("linkedin_post"));
    assert!(record.contains("twitter_post"));
}

#[tokio::test]
async fn llm_calls_retry_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.vtt");
    std::fs::write(&transcript, SAMPLE_VTT).unwrap();
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = attempts.clone();
    let h = Harness::new(
        FakeMedia::default(),
        FakeSpeech::new(0),
        FakeText::new(move |req| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(PipelineError::external("chat-completions", "HTTP 429: rate limited"))
            } else {
                Ok(canned_answer(req))
            }
        }),
    );

    SocialStage::new(SocialPlatform::Twitter, &transcript)
        .execute(&h.caps)
        .await
        .unwrap();
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
}
