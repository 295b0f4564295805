use clap::{Args, Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;
use vidpipe_core::{Granularity, StageKind, config::Link};

use crate::prompt::MissingArgument;

mod commands;
mod prompt;
mod ui;

#[derive(Parser)]
#[command(name = "vidpipe", version)]
#[command(
    about = "Trim, join, chapter, transcribe and write copy for recorded video clips"
)]
struct Cli {
    /// More log output (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cut silent stretches out of a clip or every clip in a directory
    Silence {
        input: Option<String>,
        /// Output file, or directory for a directory input
        #[arg(short, long)]
        output: Option<String>,
        /// Shortest pause that counts as silence, in seconds
        #[arg(long, default_value_t = 1.0)]
        min_silence: f64,
        /// Loudness below which audio counts as silent, in dB
        #[arg(long, default_value_t = -45.0, allow_hyphen_values = true)]
        noise_db: f64,
    },

    /// Join the clips of a directory into one video
    Concat {
        input_dir: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
        /// Stream-copy without re-encoding; clips must share codecs and resolution
        #[arg(long)]
        fast: bool,
    },

    /// Build a chapter map for the clips of a directory
    Timestamps {
        input_dir: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        /// Let the LLM propose chapters from the transcript
        #[arg(long)]
        from_transcript: bool,
        /// Transcript to read; defaults to the output directory's transcript.vtt
        #[arg(long)]
        transcript: Option<String>,
        /// Joined video whose duration bounds the chapters
        #[arg(long)]
        video: Option<String>,
        #[arg(short, long, default_value = "medium", value_parser = parse_granularity)]
        granularity: Granularity,
        /// Extra guidance for chapter extraction
        #[arg(long)]
        notes: Option<String>,
        /// Keep clip file names as chapter titles
        #[arg(long)]
        no_refine: bool,
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Transcribe a video or audio file to WebVTT
    Transcript {
        input: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Write a video description from a transcript
    Description {
        transcript: Option<String>,
        #[arg(long)]
        timestamps: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        #[command(flatten)]
        copy: CopyArgs,
        /// Link to the code shown in the video
        #[arg(long)]
        code_link: Option<String>,
    },

    /// Pick SEO keywords from a description
    Seo {
        /// Description to read; generated from the transcript if missing
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        transcript: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        #[command(flatten)]
        copy: CopyArgs,
        /// Code link for a description generated on the way
        #[arg(long)]
        code_link: Option<String>,
    },

    /// Write a LinkedIn post about the video
    Linkedin {
        transcript: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Write an X/Twitter post about the video
    Twitter {
        transcript: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Upload a video to Bunny Stream with chapters and captions
    UploadBunny {
        video: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(long)]
        timestamps: Option<String>,
        /// WebVTT captions to attach
        #[arg(long)]
        captions: Option<String>,
    },

    /// Download a remote video so it can enter the pipeline
    Download {
        url: Option<String>,
        /// Directory to download into
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run every stage in order over a clip directory
    Pipeline(PipelineArgs),

    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print where the config file is read from
    Path,
}

#[derive(Args)]
struct CopyArgs {
    #[arg(short, long)]
    title: Option<String>,
    /// Extra link as `label=url`, added after the configured links
    #[arg(long = "link", value_parser = parse_link)]
    links: Vec<Link>,
}

#[derive(Args)]
struct PipelineArgs {
    #[arg(short, long)]
    input_dir: Option<String>,
    #[arg(long)]
    output_dir: Option<String>,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(long)]
    fast_concat: bool,
    #[arg(long)]
    remove_silence: bool,
    #[arg(long, default_value_t = 1.0)]
    min_silence: f64,
    #[arg(long)]
    timestamps_from_transcript: bool,
    #[arg(short, long, default_value = "medium", value_parser = parse_granularity)]
    granularity: Granularity,
    #[arg(long)]
    notes: Option<String>,
    /// Stage to leave out; repeatable
    #[arg(long, value_parser = parse_stage)]
    skip: Vec<StageKind>,
    #[arg(long)]
    upload_bunny: bool,
    #[arg(long = "link", value_parser = parse_link)]
    links: Vec<Link>,
    #[arg(long)]
    code_link: Option<String>,
    /// Re-run stages whose outputs already exist
    #[arg(short, long)]
    force: bool,
    /// Never prompt; fail on missing input instead
    #[arg(short, long)]
    yes: bool,
}

fn parse_granularity(s: &str) -> Result<Granularity, String> {
    s.parse()
}

fn parse_stage(s: &str) -> Result<StageKind, String> {
    s.parse()
}

fn parse_link(s: &str) -> Result<Link, String> {
    let (description, url) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `label=url`, got `{s}`"))?;
    let (description, url) = (description.trim(), url.trim());
    if description.is_empty() || url.is_empty() {
        return Err(format!("expected `label=url`, got `{s}`"));
    }
    Ok(Link {
        description: description.to_string(),
        url: url.to_string(),
    })
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = commands::dispatch(cli.command).await {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        let code = if e.is::<MissingArgument>() { 2 } else { 1 };
        std::process::exit(code);
    }
}
