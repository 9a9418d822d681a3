//! Console output: status lines, section headers and the live view of a wipe.
use console::style;
use diskwipe_core::probe::{Category, Finding};
use diskwipe_core::stages::StageReport;
use diskwipe_core::verify::DeviceVerification;
use diskwipe_core::wipe::{WipeEvent, WipeOutcome, WipeResult};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

pub fn success(message: impl std::fmt::Display) {
    println!("{} {message}", style("✓").green());
}

pub fn warn(message: impl std::fmt::Display) {
    println!("{}", style(format!("WARNING: {message}")).yellow());
}

pub fn info(message: impl std::fmt::Display) {
    println!("{}", style(message).cyan());
}

/// A title between two horizontal rules.
pub fn section(title: impl std::fmt::Display) {
    println!();
    println!("{RULE}");
    println!("{title}");
    println!("{RULE}");
}

pub fn banner() {
    println!();
    println!("{}", style(RULE).cyan());
    println!(
        "  {}  {}",
        style("diskwipe").cyan().bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
    );
    println!("  Clears RAID, LVM and ZFS metadata, signatures and partition tables");
    println!("{}", style(RULE).cyan());
    println!();
}

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
    );
    pb.set_message(format!("{message}..."));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn stage_line(report: &StageReport) {
    match report.skipped {
        Some(tool) => println!(
            "  {} {} (skipped, {tool} not installed)",
            style("-").dim(),
            report.stage
        ),
        None => println!("  {} {}", style("✓").green(), report.stage),
    }
    if let Some(note) = &report.note {
        println!("    {}", style(note).yellow());
    }
}

/// Renders [`WipeEvent`]s as they arrive.
#[derive(Default)]
pub struct WipeView {
    spinner: Option<ProgressBar>,
}

impl WipeView {
    pub fn handle(&mut self, event: WipeEvent<'_>) {
        match event {
            WipeEvent::DeviceStarted(device) => section(format!("Wiping: {device}")),
            WipeEvent::ResolveWarning(warning) => warn(warning),
            WipeEvent::DeviceMissing(device) => warn(format!("Device {device} does not exist, skipping")),
            WipeEvent::AttemptStarted {
                attempt,
                max_attempts,
            } => println!("\n Wipe attempt {attempt}/{max_attempts}"),
            WipeEvent::StageStarted(stage) => {
                self.spinner = Some(spinner(stage.describe()));
            }
            WipeEvent::StageFinished(report) => {
                if let Some(pb) = self.spinner.take() {
                    pb.finish_and_clear();
                }
                stage_line(report);
            }
            WipeEvent::Retrying {
                attempt,
                max_attempts,
                remaining,
            } => warn(format!(
                "Partitions still present after attempt {attempt}/{max_attempts}: {remaining}. Retrying..."
            )),
            WipeEvent::DeviceFinished(result) => outcome_line(result),
        }
    }
}

impl Drop for WipeView {
    fn drop(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

pub fn outcome_line(result: &WipeResult) {
    match &result.outcome {
        WipeOutcome::Clean { attempts: 1 } => success(format!("{} wiped clean", result.device)),
        WipeOutcome::Clean { attempts } => {
            success(format!("{} wiped clean after {attempts} attempts", result.device))
        }
        WipeOutcome::Absent => println!("  {} {} (not present)", style("-").dim(), result.device),
        WipeOutcome::Exhausted {
            attempts,
            remaining,
        } => warn(format!(
            "{} still has partitions after {attempts} attempts: {remaining}",
            result.device
        )),
    }
}

fn finding_line(category: Category, finding: &Finding) {
    match finding {
        Finding::Clean => println!("  {} No {category}", style("✓").green()),
        Finding::Residue(found) => warn(format!("{category} found: {found}")),
        Finding::Unknown(reason) => warn(format!("could not check {category}: {reason}")),
        Finding::Skipped(tool) => println!(
            "  {} {category} check skipped ({tool} not installed)",
            style("-").dim()
        ),
    }
}

pub fn verification(verified: &DeviceVerification) {
    println!();
    println!("Checking: {}", verified.device);
    match &verified.snapshot {
        Some(snapshot) => {
            for (category, finding) in snapshot.findings() {
                finding_line(category, &finding);
            }
        }
        None => warn(format!("{} not found, skipping", verified.device)),
    }
}
