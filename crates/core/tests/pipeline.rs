mod common;

use std::sync::Mutex;

use common::*;
use vidpipe_core::{
    MetadataStore, Orchestrator, PipelineError, PipelineRun, RunObserver, StageKind, StageResult,
    StageStatus,
};

#[derive(Default)]
struct Recorder {
    started: Mutex<Vec<StageKind>>,
    finished: Mutex<Vec<(StageKind, StageStatus)>>,
}

impl RunObserver for Recorder {
    fn stage_started(&self, stage: StageKind) {
        self.started.lock().unwrap().push(stage);
    }

    fn stage_finished(&self, result: &StageResult) {
        self.finished.lock().unwrap().push((result.stage, result.status));
    }
}

fn status(report: &vidpipe_core::PipelineReport, stage: StageKind) -> StageStatus {
    report.result(stage).map(|r| r.status).unwrap()
}

#[tokio::test]
async fn full_run_produces_every_artifact() {
    let dir = clip_dir();
    let h = Harness::standard();
    let run = PipelineRun::new(dir.path().join("clips"));
    let output_dir = run.output_dir.clone();
    let recorder = Recorder::default();

    let report = Orchestrator::new(&h.caps, run, &recorder).execute().await;

    assert!(report.is_success(), "{:?}", report.results);
    for name in [
        "concatenated.mp4",
        "transcript.vtt",
        "timestamps.json",
        "description.md",
        "keywords.txt",
        "linkedin_post.md",
        "twitter_post.md",
    ] {
        assert!(output_dir.join(name).is_file(), "missing {name}");
    }
    assert_eq!(status(&report, StageKind::SilenceRemoval), StageStatus::Skipped);
    assert_eq!(status(&report, StageKind::Upload), StageStatus::Skipped);

    let started = recorder.started.lock().unwrap().clone();
    assert_eq!(
        started,
        vec![
            StageKind::Concat,
            StageKind::Transcript,
            StageKind::Timestamps,
            StageKind::Description,
            StageKind::Seo,
            StageKind::Social,
        ]
    );
    assert_eq!(recorder.finished.lock().unwrap().len(), report.results.len());

    let description = std::fs::read_to_string(output_dir.join("description.md")).unwrap();
    assert!(description.contains("## Timestamps\n\n00:00:00 - Course welcome\n00:00:30 - Building the parser\n"));
}

#[tokio::test]
async fn metadata_collects_keys_from_every_stage() {
    let dir = clip_dir();
    let h = Harness::standard();
    let run = PipelineRun::new(dir.path().join("clips"));
    let output_dir = run.output_dir.clone();

    Orchestrator::new(&h.caps, run, &()).execute().await;

    let record = MetadataStore::load(&output_dir).await;
    for key in [
        "video",
        "title",
        "duration_seconds",
        "transcript",
        "transcript_path",
        "timestamps",
        "chapter_source",
        "description",
        "keywords",
        "linkedin_post",
        "twitter_post",
    ] {
        assert!(record.contains(key), "missing metadata key {key}");
    }
    assert_eq!(record.text("chapter_source").as_deref(), Some("clips+llm"));
}

#[tokio::test]
async fn rerun_reuses_existing_artifacts() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");

    Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;
    let llm_calls = h.text.commands().len();
    let stt_calls = h.speech.calls();

    let report = Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;

    for stage in [
        StageKind::Concat,
        StageKind::Transcript,
        StageKind::Timestamps,
        StageKind::Description,
        StageKind::Seo,
        StageKind::Social,
    ] {
        assert_eq!(status(&report, stage), StageStatus::Reused, "{stage}");
    }
    assert_eq!(h.text.commands().len(), llm_calls);
    assert_eq!(h.speech.calls(), stt_calls);
}

#[tokio::test]
async fn force_reruns_every_stage() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");

    Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;
    let mut run = PipelineRun::new(&clips);
    run.force = true;
    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert!(report.failures().next().is_none());
    assert!(
        report
            .results
            .iter()
            .all(|r| r.status != StageStatus::Reused)
    );
    assert_eq!(h.speech.calls(), 2);
}

#[tokio::test]
async fn failed_description_does_not_stop_later_stages() {
    let dir = clip_dir();
    let h = Harness::new(
        FakeMedia::with_durations(&[("01-intro.mp4", 30.0), ("02-body.mp4", 25.0)]),
        FakeSpeech::new(0),
        FakeText::new(|req| {
            if req.command == "description" {
                Err(PipelineError::external("chat-completions", "HTTP 400: context too long"))
            } else {
                Ok(canned_answer(req))
            }
        }),
    );
    let run = PipelineRun::new(dir.path().join("clips"));
    let output_dir = run.output_dir.clone();

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert!(!report.is_success());
    let description = report.result(StageKind::Description).unwrap();
    assert_eq!(description.status, StageStatus::Failed);
    assert!(description.error.as_deref().unwrap().contains("HTTP 400"));
    assert_eq!(status(&report, StageKind::Social), StageStatus::Completed);
    assert!(output_dir.join("twitter_post.md").is_file());
    assert!(!output_dir.join("description.md").exists());
    // Permanent errors are not retried.
    let description_calls = h
        .text
        .commands()
        .into_iter()
        .filter(|c| *c == "description")
        .count();
    assert_eq!(description_calls, 2);
}

#[tokio::test]
async fn skipped_transcript_is_generated_on_demand() {
    let dir = clip_dir();
    let h = Harness::standard();
    let mut run = PipelineRun::new(dir.path().join("clips"));
    run.skip.insert(StageKind::Transcript);
    let output_dir = run.output_dir.clone();

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert_eq!(status(&report, StageKind::Transcript), StageStatus::Skipped);
    let generated = report
        .results
        .iter()
        .find(|r| r.stage == StageKind::Transcript && r.status == StageStatus::Completed)
        .unwrap();
    assert!(generated.warnings.iter().any(|w| w.contains("on demand")));
    assert_eq!(status(&report, StageKind::Description), StageStatus::Completed);
    assert!(output_dir.join("transcript.vtt").is_file());
    assert_eq!(h.speech.calls(), 1);
}

#[tokio::test]
async fn transcript_chapters_pull_in_the_transcript() {
    let dir = clip_dir();
    let h = Harness::standard();
    let run = PipelineRun::new(dir.path().join("clips"))
        .transcript_chapters(vidpipe_core::Granularity::Low, None);
    let output_dir = run.output_dir.clone();

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert_eq!(status(&report, StageKind::Timestamps), StageStatus::Completed);
    let record = MetadataStore::load(&output_dir).await;
    assert_eq!(record.text("chapter_source").as_deref(), Some("transcript"));
}

#[tokio::test]
async fn upload_without_credentials_fails_alone() {
    let dir = clip_dir();
    let h = Harness::standard();
    let mut run = PipelineRun::new(dir.path().join("clips"));
    run.upload_bunny = true;

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    let failures: Vec<_> = report.failures().map(|r| r.stage).collect();
    assert_eq!(failures, vec![StageKind::Upload]);
}

#[tokio::test]
async fn silence_removal_feeds_concat() {
    let dir = clip_dir();
    let mut media = FakeMedia::with_durations(&[("01-intro.mp4", 30.0), ("02-body.mp4", 25.0)]);
    media.silences = vec![vidpipe_core::types::TimeSpan::new(10.0, 14.0)];
    let h = Harness::new(media, FakeSpeech::new(0), FakeText::canned());
    let clips = dir.path().join("clips");
    let mut run = PipelineRun::new(&clips);
    run.remove_silence = true;

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert_eq!(status(&report, StageKind::SilenceRemoval), StageStatus::Completed);
    assert!(clips.join("processed").join("01-intro.mp4").is_file());
    assert!(clips.join("processed").join("02-body.mp4").is_file());
    assert!(clips.join("output").join("concatenated.mp4").is_file());
}

#[tokio::test]
async fn missing_clips_fail_concat_and_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::standard();
    let run = PipelineRun::new(dir.path());

    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert_eq!(status(&report, StageKind::Concat), StageStatus::Failed);
    assert_eq!(status(&report, StageKind::Transcript), StageStatus::Failed);
    assert_eq!(status(&report, StageKind::Description), StageStatus::Failed);
    assert_eq!(h.speech.calls(), 0);
    assert!(h.text.commands().is_empty());
}

#[tokio::test]
async fn rebuilt_video_invalidates_downstream_artifacts() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");

    Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;
    std::fs::remove_file(clips.join("output").join("concatenated.mp4")).unwrap();
    let report = Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;

    assert!(report.is_success(), "{:?}", report.results);
    assert_eq!(status(&report, StageKind::Concat), StageStatus::Completed);
    for stage in [
        StageKind::Transcript,
        StageKind::Timestamps,
        StageKind::Description,
        StageKind::Seo,
        StageKind::Social,
    ] {
        assert_eq!(status(&report, stage), StageStatus::Completed, "{stage}");
    }
    assert_eq!(h.speech.calls(), 2);
}

#[tokio::test]
async fn rebuilt_description_only_refreshes_keywords() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");

    Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;
    std::fs::remove_file(clips.join("output").join("description.md")).unwrap();
    let report = Orchestrator::new(&h.caps, PipelineRun::new(&clips), &()).execute().await;

    assert_eq!(status(&report, StageKind::Transcript), StageStatus::Reused);
    assert_eq!(status(&report, StageKind::Description), StageStatus::Completed);
    assert_eq!(status(&report, StageKind::Seo), StageStatus::Completed);
    assert_eq!(status(&report, StageKind::Social), StageStatus::Reused);
}

#[tokio::test]
async fn stale_partial_files_are_never_used() {
    let dir = clip_dir();
    let h = Harness::standard();
    let clips = dir.path().join("clips");
    let processed = clips.join("processed");
    let output = clips.join("output");
    std::fs::create_dir_all(&processed).unwrap();
    std::fs::create_dir_all(&output).unwrap();
    std::fs::write(processed.join("01-intro.partial.mp4"), b"half").unwrap();
    std::fs::write(output.join("concatenated.partial.mp4"), b"half").unwrap();

    let mut run = PipelineRun::new(&clips);
    run.remove_silence = true;
    let report = Orchestrator::new(&h.caps, run, &()).execute().await;

    assert!(report.is_success(), "{:?}", report.results);
    assert_eq!(status(&report, StageKind::SilenceRemoval), StageStatus::Completed);
    assert_eq!(status(&report, StageKind::Concat), StageStatus::Completed);
    let chapters: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.join("timestamps.json")).unwrap()).unwrap();
    assert_eq!(chapters.as_array().unwrap().len(), 2);
    assert_eq!(chapters[1]["end"], "00:00:55");
    assert!(!output.join("concatenated.partial.mp4").exists());
}
