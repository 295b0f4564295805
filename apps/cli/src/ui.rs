use std::{
    cell::RefCell,
    path::Path,
    time::{Duration, Instant},
};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use vidpipe_core::{PipelineReport, RunObserver, StageKind, StageResult, StageStatus};

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(spinner_style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn header(subtitle: &str) {
    println!(
        "\n{}  {}\n",
        style("vidpipe").cyan().bold(),
        style(subtitle).dim()
    );
}

pub fn rule() {
    println!("{}", style("─".repeat(60)).dim());
}

pub fn done_line(label: &str, path: &Path, elapsed: Duration) -> String {
    format!(
        "{} {}: {} {}",
        style("✓").green().bold(),
        label,
        style(path.display()).dim(),
        style(format!("[{}]", format_duration(elapsed))).dim()
    )
}

pub fn warn_line(message: &str) {
    println!("  {} {}", style("!").yellow().bold(), style(message).yellow());
}

fn stage_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::SilenceRemoval => "Silence removal",
        StageKind::Concat => "Concatenation",
        StageKind::Timestamps => "Timestamps",
        StageKind::Transcript => "Transcript",
        StageKind::Description => "Description",
        StageKind::Seo => "SEO keywords",
        StageKind::Social => "Social posts",
        StageKind::Upload => "Bunny upload",
    }
}

/// One spinner per running stage, one status line per finished stage.
#[derive(Default)]
pub struct SpinnerObserver {
    current: RefCell<Option<(ProgressBar, Instant)>>,
}

impl SpinnerObserver {
    fn status_line(result: &StageResult, elapsed: Duration) -> String {
        let label = stage_label(result.stage);
        match result.status {
            StageStatus::Completed => format!(
                "{} {} {}",
                style("✓").green().bold(),
                label,
                style(format!("[{}]", format_duration(elapsed))).dim()
            ),
            StageStatus::Reused => format!(
                "{} {} {}",
                style("↺").cyan().bold(),
                label,
                style("(reused)").dim()
            ),
            StageStatus::Skipped => format!(
                "{} {}",
                style("-").dim(),
                style(format!("{label} (skipped)")).dim()
            ),
            StageStatus::Failed => format!(
                "{} {}: {}",
                style("✗").red().bold(),
                label,
                style(result.error.as_deref().unwrap_or("failed")).red()
            ),
        }
    }
}

impl RunObserver for SpinnerObserver {
    fn stage_started(&self, stage: StageKind) {
        let spinner = create_spinner(&format!("{}...", stage_label(stage)));
        *self.current.borrow_mut() = Some((spinner, Instant::now()));
    }

    fn stage_finished(&self, result: &StageResult) {
        let running = self.current.borrow_mut().take();
        match running {
            Some((spinner, started)) => {
                spinner.finish_with_message(Self::status_line(result, started.elapsed()));
            }
            None => println!("{}", Self::status_line(result, result.elapsed)),
        }
        for warning in &result.warnings {
            warn_line(warning);
        }
    }
}

pub fn print_summary(report: &PipelineReport) {
    rule();
    let failed = report.failures().count();
    if failed == 0 {
        println!(
            "{} Pipeline finished {}",
            style("✓").green().bold(),
            style(format!("[{}]", format_duration(report.elapsed))).dim()
        );
    } else {
        println!(
            "{} Pipeline finished with {} failed stage(s) {}",
            style("✗").red().bold(),
            failed,
            style(format!("[{}]", format_duration(report.elapsed))).dim()
        );
    }
    let artifacts: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.is_success())
        .flat_map(|r| r.artifacts.iter())
        .collect();
    for artifact in artifacts {
        println!("  {}", style(artifact.display()).dim());
    }
    println!("  {}", style(format!("run {}", report.run_id)).dim());
}
