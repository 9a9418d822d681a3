mod term;
mod ui;

use anyhow::{Result, bail};
use clap::Parser;
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use diskwipe_core::device::Device;
use diskwipe_core::error::WipeError;
use diskwipe_core::host::BlockHost;
use diskwipe_core::platform::LinuxHost;
use diskwipe_core::select::{self, Approval, FINAL_PHRASE, Protection, WIPE_PHRASE};
use diskwipe_core::wipe::{self, WipeConfig};
use diskwipe_core::{preflight, probe, verify};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use term::TermRestorer;

#[derive(Parser)]
#[command(name = "diskwipe")]
#[command(
    about = "Wipe disks back to a blank state: no RAID, LVM or ZFS metadata, no signatures, no partitions",
    version
)]
struct Cli {
    /// Devices to wipe, e.g. /dev/sdb. Without any, disks are detected
    /// and offered interactively.
    devices: Vec<PathBuf>,

    /// Diagnostic log filter written to stderr (e.g. `info`, `diskwipe_core=debug`)
    #[arg(long, env = "DISKWIPE_LOG", default_value = "warn")]
    log_level: String,
}

/// Reads one line of typed input.
///
/// A Ctrl+C while the prompt is open surfaces as [`WipeError::Interrupted`].
fn ask(prompt: &str, running: &AtomicBool) -> Result<String> {
    let answer = Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text();
    if !running.load(Ordering::SeqCst) {
        return Err(WipeError::Interrupted.into());
    }
    match answer {
        Ok(answer) => Ok(answer),
        Err(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::Interrupted => {
            Err(WipeError::Interrupted.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn describe_protection(path: &Path, reason: Protection) -> String {
    match reason {
        Protection::Removable => format!("{} is a USB device", path.display()),
        Protection::System => format!("{} holds the running system", path.display()),
    }
}

/// Why `path` would normally be left alone, if at all.
fn protection_of(host: &LinuxHost, inventory: &[Device], path: &Path) -> Option<Protection> {
    let target = host.canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    match inventory.iter().find(|d| d.path == target) {
        Some(device) => Protection::of(device),
        None => probe::transport_is_removable(host, &target).then_some(Protection::Removable),
    }
}

/// Asks before wiping a protected device. Returns whether to keep it.
fn allow_protected(path: &Path, reason: Protection, running: &AtomicBool) -> Result<bool> {
    ui::warn(describe_protection(path, reason));
    let answer = ask(
        &format!("  Override and wipe this device anyway? Type '{FINAL_PHRASE}' to confirm"),
        running,
    )?;
    if select::override_accepted(&answer) {
        Ok(true)
    } else {
        println!("  Skipping {}", path.display());
        Ok(false)
    }
}

fn inventory_or_empty(host: &LinuxHost) -> Vec<Device> {
    host.inventory().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not list block devices");
        Vec::new()
    })
}

/// Checks the devices named on the command line.
fn targets_from_args(host: &LinuxHost, devices: &[PathBuf], running: &AtomicBool) -> Result<Vec<PathBuf>> {
    for path in devices {
        select::validate_argument(path, host.exists(path))?;
    }

    let inventory = inventory_or_empty(host);
    let mut targets = Vec::new();
    for path in devices {
        if let Some(reason) = protection_of(host, &inventory, path) {
            if !allow_protected(path, reason, running)? {
                continue;
            }
        }
        if !targets.contains(path) {
            targets.push(path.clone());
        }
    }
    Ok(targets)
}

/// Lists the disks, proposes the unprotected ones and lets the user edit
/// the selection.
fn targets_interactively(host: &LinuxHost, running: &AtomicBool) -> Result<Vec<PathBuf>> {
    ui::section("Available Block Devices");
    let inventory = host.inventory()?;
    for device in &inventory {
        println!("  {device}");
    }

    let proposal = select::propose_targets(&inventory);
    if proposal.defaults.is_empty() {
        bail!("No non-USB block devices found");
    }

    println!();
    println!("Devices selected by default:");
    for path in &proposal.defaults {
        println!("  {} {}", style("✗").red(), path.display());
    }
    for (device, reason) in &proposal.protected {
        println!(
            "  {} {} ({})",
            style("🔒").dim(),
            device.path.display(),
            match reason {
                Protection::Removable => "USB, protected",
                Protection::System => "system disk, protected",
            }
        );
    }
    println!();
    println!("Press Enter to accept, or type device paths separated by spaces,");
    println!("e.g. '/dev/sda /dev/sdb' or '/dev/nvme0n1'.");

    let default_list = proposal
        .defaults
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let input = ask(&format!("Devices [{default_list}]"), running)?;
    let selection = select::parse_selection(&input, &proposal.defaults);
    for rejected in &selection.rejected {
        ui::warn(format!("Invalid device path (must start with /dev/): {rejected}"));
    }

    let mut targets = Vec::new();
    for path in selection.devices {
        if !host.exists(&path) {
            ui::warn(format!("Device does not exist: {}", path.display()));
            continue;
        }
        // Defaults were already screened; anything typed in is checked again.
        if !selection.used_defaults {
            if let Some(reason) = protection_of(host, &inventory, &path) {
                if !allow_protected(&path, reason, running)? {
                    continue;
                }
            }
        }
        targets.push(path);
    }
    Ok(targets)
}

fn show_targets(host: &LinuxHost, targets: &[PathBuf]) {
    ui::section("Devices to be Wiped");
    for path in targets {
        let (device, _) = probe::resolve(host, path);
        println!();
        println!("  Device: {}", style(path.display()).cyan());
        if device.is_alias() {
            println!("  → Resolves to: {}", device.target().display());
        }
        match host.describe(device.target()) {
            Ok(table) => {
                for line in table.lines() {
                    println!("    {line}");
                }
            }
            Err(e) => tracing::warn!(device = %device, error = %e, "could not describe device"),
        }
    }

    println!();
    println!(
        "{}",
        style("YOU ARE ABOUT TO PERMANENTLY DESTROY ALL DATA ON:").red().bold()
    );
    for path in targets {
        println!("  {}", style(format!("✗ {}", path.display())).red());
    }
    println!();
}

fn run(cli: &Cli, running: &AtomicBool) -> Result<()> {
    preflight::check_root()?;
    let host = LinuxHost::new();
    preflight::check_tools(&host)?;

    ui::banner();

    let targets = if cli.devices.is_empty() {
        targets_interactively(&host, running)?
    } else {
        targets_from_args(&host, &cli.devices, running)?
    };
    if targets.is_empty() {
        return Err(WipeError::NoTargets.into());
    }

    show_targets(&host, &targets);
    let approval = select::confirm_wipe(|phrase| {
        let prompt = if phrase == WIPE_PHRASE {
            format!("Type '{WIPE_PHRASE}' to confirm")
        } else {
            format!("Are you absolutely sure? Type '{phrase}' to proceed")
        };
        ask(&prompt, running)
    })?;
    if approval == Approval::Rejected {
        println!("Aborted. No changes made.");
        return Ok(());
    }

    let config = WipeConfig::default();
    println!();
    ui::info("Starting wipe operation...");
    let mut view = ui::WipeView::default();
    let results = wipe::wipe_all(&host, &targets, &config, running, |event| view.handle(event))?;
    drop(view);

    ui::section("Verification");
    let mut refreshing = Some(ui::spinner("Refreshing partition tables before verification"));
    let report = verify::verify_all(&host, &targets, &config, running, |verified| {
        if let Some(pb) = refreshing.take() {
            pb.finish_and_clear();
        }
        ui::verification(verified);
    })?;
    if let Some(pb) = refreshing.take() {
        pb.finish_and_clear();
    }

    ui::section("Summary");
    for result in &results {
        ui::outcome_line(result);
    }
    println!();
    if results.iter().all(|r| r.succeeded()) && report.all_clean() {
        ui::success(style("All specified devices have been wiped clean.").green().bold());
    } else {
        ui::warn("Some devices may not be completely clean. Review the output above.");
    }
    Ok(())
}

fn is_cancel(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<WipeError>(), Some(WipeError::Interrupted))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(io::stderr)
        .init();

    // Restores the terminal when main() returns.
    let _term_restorer = TermRestorer::new();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    match run(&cli, &running) {
        Err(e) if is_cancel(&e) => {
            println!("\n{}", style("Cancelled by user").yellow());
            Ok(())
        }
        other => other,
    }
}
