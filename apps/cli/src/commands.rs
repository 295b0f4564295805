use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result, bail};
use console::style;
use vidpipe_core::{
    AppConfig, Capabilities, Orchestrator, PipelineRun, Stage, config,
    paths,
    stages::{
        BunnyUploadStage, ConcatStage, DescriptionStage, SeoStage, SilenceStage, SocialPlatform,
        SocialStage, StageOutput, TimestampMode, TimestampsStage, TranscriptStage, download_video,
        transcript::TRANSCRIPT_FILE_NAME,
    },
};

use crate::{
    Command, ConfigAction, CopyArgs, PipelineArgs,
    prompt::{self, require, require_path},
    ui,
};

fn load_config() -> Result<AppConfig> {
    let path = config::default_config_path();
    tracing::debug!(path = %path.display(), "loading configuration");
    AppConfig::load_from(&path).context("unable to load configuration")
}

fn optional_path(raw: Option<String>) -> Option<PathBuf> {
    raw.filter(|r| !r.trim().is_empty())
        .map(|r| paths::normalize(&r))
}

/// Run one stage under a spinner and report what it wrote.
async fn run_with_spinner<S: Stage>(
    stage: &S,
    caps: &Capabilities,
    working: &str,
    label: &str,
) -> Result<S::Output> {
    let started = Instant::now();
    let spinner = ui::create_spinner(working);
    match stage.execute(caps).await {
        Ok(output) => {
            let artifacts = output.artifacts();
            match artifacts.first() {
                Some(first) => spinner.finish_with_message(ui::done_line(label, first, started.elapsed())),
                None => spinner.finish_and_clear(),
            }
            for extra in artifacts.iter().skip(1) {
                println!("  {}", style(extra.display()).dim());
            }
            for warning in output.warnings() {
                ui::warn_line(&warning);
            }
            Ok(output)
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e.into())
        }
    }
}

fn content_links(config: &AppConfig, copy: &CopyArgs) -> Vec<config::Link> {
    let mut links = config.links.clone();
    links.extend(copy.links.iter().cloned());
    links
}

pub async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Silence {
            input,
            output,
            min_silence,
            noise_db,
        } => {
            let input = require_path(input, "input", "Clip or clip directory")?;
            let mut stage = SilenceStage::new(input)
                .output(optional_path(output))
                .min_silence(min_silence);
            stage.noise_db = noise_db;
            let caps = Capabilities::from_config(&load_config()?);
            let report = run_with_spinner(&stage, &caps, "Removing silence...", "Trimmed").await?;
            if !report.failures.is_empty() {
                println!(
                    "{} {} of {} clip(s) failed",
                    style("!").yellow().bold(),
                    report.failures.len(),
                    report.failures.len() + report.succeeded.len()
                );
            }
        }

        Command::Concat {
            input_dir,
            output,
            title,
            fast,
        } => {
            let input_dir = require_path(input_dir, "input_dir", "Clip directory")?;
            let mut stage = ConcatStage::new(input_dir);
            stage.output = optional_path(output);
            stage.title = title;
            stage.fast = fast;
            let caps = Capabilities::from_config(&load_config()?);
            let working = if fast { "Joining clips (stream copy)..." } else { "Re-encoding and joining clips..." };
            let output = run_with_spinner(&stage, &caps, working, "Joined").await?;
            println!(
                "  {}",
                style(format!("{} clip(s), {}", output.clips.len(), vidpipe_core::format::format_hms(output.duration))).dim()
            );
        }

        Command::Timestamps {
            input_dir,
            output,
            from_transcript,
            transcript,
            video,
            granularity,
            notes,
            no_refine,
            title,
        } => {
            let input_dir = require_path(input_dir, "input_dir", "Clip directory")?;
            let transcript = optional_path(transcript).or_else(|| {
                let conventional = paths::default_output_dir(&input_dir).join(TRANSCRIPT_FILE_NAME);
                conventional.is_file().then_some(conventional)
            });
            let mode = if from_transcript {
                TimestampMode::Transcript { granularity, notes }
            } else {
                TimestampMode::Clips {
                    refine_titles: !no_refine,
                }
            };
            let mut stage = TimestampsStage::new(input_dir, mode);
            stage.output = optional_path(output);
            stage.transcript = transcript;
            stage.video = optional_path(video);
            stage.title = title;
            let caps = Capabilities::from_config(&load_config()?);
            let output = run_with_spinner(&stage, &caps, "Building chapters...", "Timestamps").await?;
            println!(
                "  {}",
                style(format!("{} chapter(s) from {}", output.chapters.len(), output.source.name())).dim()
            );
        }

        Command::Transcript { input, output } => {
            let input = require_path(input, "input", "Video or audio file")?;
            let stage = TranscriptStage::new(input).output(optional_path(output));
            let caps = Capabilities::from_config(&load_config()?);
            run_with_spinner(&stage, &caps, "Transcribing...", "Transcript").await?;
        }

        Command::Description {
            transcript,
            timestamps,
            output,
            copy,
            code_link,
        } => {
            let config = load_config()?;
            let transcript = require_path(transcript, "transcript", "Transcript (.vtt)")?;
            let stage = DescriptionStage {
                transcript,
                timestamps: optional_path(timestamps),
                output: optional_path(output),
                title: copy.title.clone(),
                links: content_links(&config, &copy),
                code_link,
            };
            let caps = Capabilities::from_config(&config);
            run_with_spinner(&stage, &caps, "Writing description...", "Description").await?;
        }

        Command::Seo {
            description,
            transcript,
            output,
            copy,
            code_link,
        } => {
            let config = load_config()?;
            let description = optional_path(description);
            let transcript = match (&description, transcript) {
                (None, transcript) => Some(require_path(transcript, "transcript", "Transcript (.vtt)")?),
                (Some(_), transcript) => optional_path(transcript),
            };
            let stage = SeoStage {
                description,
                transcript,
                output: optional_path(output),
                title: copy.title.clone(),
                links: content_links(&config, &copy),
                code_link,
            };
            let caps = Capabilities::from_config(&config);
            let output = run_with_spinner(&stage, &caps, "Picking keywords...", "Keywords").await?;
            println!("  {}", style(&output.content).dim());
        }

        Command::Linkedin {
            transcript,
            output,
            title,
        } => social(SocialPlatform::LinkedIn, transcript, output, title).await?,

        Command::Twitter {
            transcript,
            output,
            title,
        } => social(SocialPlatform::Twitter, transcript, output, title).await?,

        Command::UploadBunny {
            video,
            title,
            timestamps,
            captions,
        } => {
            let config = load_config()?;
            let video = require_path(video, "video", "Video to upload")?;
            let stage = BunnyUploadStage {
                video,
                title,
                credentials: config.bunny(),
                timestamps: optional_path(timestamps),
                captions: optional_path(captions),
            };
            let caps = Capabilities::from_config(&config);
            let output = run_with_spinner(&stage, &caps, "Uploading to Bunny Stream...", "Uploaded").await?;
            println!("  {}", style(format!("video id {}", output.video_id)).dim());
        }

        Command::Download { url, output } => {
            let url = require(url, "url", "Video URL")?;
            let output_dir = optional_path(output)
                .unwrap_or_else(|| paths::normalize("."));
            let caps = Capabilities::from_config(&load_config()?);
            let started = Instant::now();
            let spinner = ui::create_spinner("Downloading video...");
            let downloaded = download_video(&caps, url.trim(), &output_dir).await;
            spinner.finish_and_clear();
            let video = downloaded?;
            println!("{}", ui::done_line("Downloaded", &video, started.elapsed()));
        }

        Command::Pipeline(args) => pipeline(args).await?,

        Command::Config { action } => match action {
            Some(ConfigAction::Path) => println!("{}", config::default_config_path().display()),
            None => {
                let config = load_config()?;
                println!(
                    "{}\n",
                    style(format!("# {}", config::default_config_path().display())).dim()
                );
                println!("{}", config.describe());
            }
        },
    }
    Ok(())
}

async fn social(
    platform: SocialPlatform,
    transcript: Option<String>,
    output: Option<String>,
    title: Option<String>,
) -> Result<()> {
    let transcript = require_path(transcript, "transcript", "Transcript (.vtt)")?;
    let mut stage = SocialStage::new(platform, transcript);
    stage.output = optional_path(output);
    stage.title = title;
    let caps = Capabilities::from_config(&load_config()?);
    let label = match platform {
        SocialPlatform::LinkedIn => "LinkedIn post",
        SocialPlatform::Twitter => "Twitter post",
    };
    run_with_spinner(&stage, &caps, &format!("Writing {label}..."), label).await?;
    Ok(())
}

fn pipeline_run(args: PipelineArgs, input_dir: PathBuf, config: &AppConfig) -> Result<PipelineRun> {
    let interactive = !args.yes;
    let title = prompt::optional(args.title, "Video title (empty to skip)", interactive)?;

    let mut run = PipelineRun::new(&input_dir).with_config(config);
    if let Some(output_dir) = optional_path(args.output_dir) {
        run.output_dir = output_dir;
    }
    run.title = title;
    run.fast_concat = args.fast_concat;
    run.remove_silence = args.remove_silence;
    run.min_silence = args.min_silence;
    if args.timestamps_from_transcript {
        run = run.transcript_chapters(args.granularity, args.notes);
    }
    run.skip = args.skip.into_iter().collect::<BTreeSet<_>>();
    run.upload_bunny = args.upload_bunny;
    run.force = args.force;
    run.links.extend(args.links);
    run.code_link = args.code_link;

    if run.upload_bunny && run.bunny.is_none() {
        bail!(
            "--upload-bunny needs Bunny credentials: set [bunny] in {} or BUNNY_LIBRARY_ID and BUNNY_ACCESS_KEY",
            config::default_config_path().display()
        );
    }
    Ok(run)
}

fn ensure_clip_dir(input_dir: &Path) -> Result<()> {
    paths::source_clips(input_dir)?;
    Ok(())
}

async fn pipeline(args: PipelineArgs) -> Result<()> {
    let config = load_config()?;
    let input_dir = if args.yes {
        match optional_path(args.input_dir.clone()) {
            Some(dir) => dir,
            None => return Err(prompt::MissingArgument { name: "input_dir" }.into()),
        }
    } else {
        require_path(args.input_dir.clone(), "input_dir", "Clip directory")?
    };
    ensure_clip_dir(&input_dir)?;
    let run = pipeline_run(args, input_dir, &config)?;

    ui::header("Video Pipeline");
    println!(
        "{} {}\n{} {}",
        style("input ").dim(),
        run.input_dir.display(),
        style("output").dim(),
        run.output_dir.display()
    );
    ui::rule();

    let caps = Capabilities::from_config(&config);
    let observer = ui::SpinnerObserver::default();
    let report = Orchestrator::new(&caps, run, &observer).execute().await;
    ui::print_summary(&report);

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} stage(s) failed");
    }
    Ok(())
}
