//! Startup checks that must pass before anything touches a device.
use crate::error::{Result, WipeError};
use crate::host::BlockHost;

/// Tools the wipe cannot run without.
pub const REQUIRED_TOOLS: [&str; 9] = [
    "wipefs",
    "sgdisk",
    "lsblk",
    "blkid",
    "dd",
    "blockdev",
    "partprobe",
    "sfdisk",
    "parted",
];

/// Tools whose stages or checks are skipped when missing.
pub const OPTIONAL_TOOLS: [&str; 7] = ["mdadm", "pvs", "vgchange", "pvremove", "zpool", "udevadm", "umount"];

/// Fails unless the process runs with an effective UID of 0.
#[cfg(unix)]
pub fn check_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(WipeError::NotRoot)
    }
}

/// Fails naming every required tool that is not on `PATH`.
pub fn check_tools<H: BlockHost + ?Sized>(host: &H) -> Result<()> {
    let missing: Vec<String> = REQUIRED_TOOLS
        .iter()
        .filter(|tool| !host.has_tool(tool))
        .map(|tool| tool.to_string())
        .collect();

    for tool in OPTIONAL_TOOLS.iter().filter(|tool| !host.has_tool(tool)) {
        tracing::info!(%tool, "optional tool not found, related steps will be skipped");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(WipeError::MissingTools(missing))
    }
}
