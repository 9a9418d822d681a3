//! Observes device state: partitions, signatures, LVM and RAID membership.
//!
//! Nothing in here mutates a device. Each function is a thin interpretation of
//! one or more [`BlockHost`] queries.
use crate::device::DeviceRef;
use crate::host::{BlockHost, BlockNode, HostResult};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Resolves `path` to its canonical device node.
///
/// Returns the reference and, if resolution failed (broken link, permission),
/// a warning; in that case the original path is used as the target.
pub fn resolve<H: BlockHost + ?Sized>(host: &H, path: &Path) -> (DeviceRef, Option<String>) {
    match host.canonicalize(path) {
        Ok(resolved) => (DeviceRef::new(path, resolved), None),
        Err(e) => {
            let warning = format!("could not resolve device path {}: {e}", path.display());
            tracing::warn!("{warning}");
            (DeviceRef::new(path, path), Some(warning))
        }
    }
}

/// What the topology query says about a device's partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionState {
    /// The query succeeded and found nothing below the device.
    Clean,
    /// Partitions (or devices stacked on them) are still present.
    Residual(Vec<PathBuf>),
    /// The query itself failed; the state is not known.
    Unknown(String),
}

impl PartitionState {
    pub fn is_clean(&self) -> bool {
        matches!(self, PartitionState::Clean)
    }

    /// Known partitions, or an empty list when clean or unknown.
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            PartitionState::Residual(paths) => paths,
            _ => &[],
        }
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Clean => f.write_str("no partitions"),
            PartitionState::Residual(paths) => {
                let names: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "{}", names.join(", "))
            }
            PartitionState::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

/// Lists everything below `device` in the block topology.
pub fn list_partitions<H: BlockHost + ?Sized>(host: &H, device: &Path) -> PartitionState {
    match host.children(device) {
        Ok(children) => {
            let below: Vec<PathBuf> = children
                .into_iter()
                .map(|node| node.path)
                .filter(|p| p != device)
                .collect();
            if below.is_empty() {
                PartitionState::Clean
            } else {
                PartitionState::Residual(below)
            }
        }
        Err(e) => {
            tracing::debug!(device = %device.display(), error = %e, "partition query failed");
            PartitionState::Unknown(e.to_string())
        }
    }
}

/// The typed nodes below `device`, or nothing if the query fails.
pub fn descendants<H: BlockHost + ?Sized>(host: &H, device: &Path) -> Vec<BlockNode> {
    match host.children(device) {
        Ok(children) => children.into_iter().filter(|n| n.path != device).collect(),
        Err(e) => {
            tracing::debug!(device = %device.display(), error = %e, "partition query failed");
            Vec::new()
        }
    }
}

/// Whether the signature probe recognises anything on `device`.
pub fn signature_present<H: BlockHost + ?Sized>(host: &H, device: &Path) -> HostResult<bool> {
    let found = host.signatures(device)?;
    if let Some(found) = &found {
        tracing::info!(device = %device.display(), %found, "signature still present");
    }
    Ok(found.is_some())
}

/// Combines the two removable-transport checks.
///
/// Transport reporting is unreliable behind some USB bridges, so a stable
/// identifier containing `usb` counts as well. Errors count as "no".
pub fn removable_from(transport: HostResult<String>, links: io::Result<Vec<PathBuf>>) -> bool {
    let by_transport = transport.is_ok_and(|t| t.trim().eq_ignore_ascii_case("usb"));
    let by_id = links.is_ok_and(|links| {
        links
            .iter()
            .any(|link| link.to_string_lossy().to_lowercase().contains("usb"))
    });
    by_transport || by_id
}

/// Whether `device` is attached over a removable (USB) transport.
pub fn transport_is_removable<H: BlockHost + ?Sized>(host: &H, device: &Path) -> bool {
    removable_from(host.transport(device), host.stable_id_links(device))
}

/// Outcome of checking one category of leftover metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Clean,
    /// Something is still there; the text says what.
    Residue(String),
    /// The check ran but its answer could not be obtained.
    Unknown(String),
    /// The tool needed for this check is not installed.
    Skipped(&'static str),
}

impl Finding {
    /// Whether this finding counts against a clean result.
    pub fn is_failure(&self) -> bool {
        matches!(self, Finding::Residue(_) | Finding::Unknown(_))
    }

    fn from_flag(result: HostResult<bool>, residue: &str) -> Self {
        match result {
            Ok(false) => Finding::Clean,
            Ok(true) => Finding::Residue(residue.to_string()),
            Err(e) => Finding::Unknown(e.to_string()),
        }
    }
}

/// A point-in-time view of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub exists: bool,
    pub partitions: PartitionState,
    pub signatures: Finding,
    pub lvm: Finding,
    pub raid: Finding,
}

impl DeviceSnapshot {
    pub fn findings(&self) -> [(Category, Finding); 4] {
        let partitions = match &self.partitions {
            PartitionState::Clean => Finding::Clean,
            residual @ PartitionState::Residual(_) => Finding::Residue(residual.to_string()),
            PartitionState::Unknown(reason) => Finding::Unknown(reason.clone()),
        };
        [
            (Category::Partitions, partitions),
            (Category::Signatures, self.signatures.clone()),
            (Category::Lvm, self.lvm.clone()),
            (Category::Raid, self.raid.clone()),
        ]
    }

    pub fn is_clean(&self) -> bool {
        self.findings().iter().all(|(_, f)| !f.is_failure())
    }
}

/// The categories of metadata that verification reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Partitions,
    Signatures,
    Lvm,
    Raid,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Partitions => "partitions",
            Category::Signatures => "filesystem signatures",
            Category::Lvm => "LVM metadata",
            Category::Raid => "RAID metadata",
        })
    }
}

/// Observes every category for `device`.
///
/// LVM and RAID are skipped when their tools are missing.
pub fn snapshot<H: BlockHost + ?Sized>(host: &H, device: &Path) -> DeviceSnapshot {
    if !host.exists(device) {
        return DeviceSnapshot {
            exists: false,
            partitions: PartitionState::Clean,
            signatures: Finding::Clean,
            lvm: Finding::Clean,
            raid: Finding::Clean,
        };
    }

    let signatures = Finding::from_flag(signature_present(host, device), "filesystem signature");
    let lvm = if host.has_tool("pvs") {
        Finding::from_flag(host.has_pv_label(device), "LVM physical volume label")
    } else {
        Finding::Skipped("pvs")
    };
    let raid = if host.has_tool("mdadm") {
        Finding::from_flag(host.has_raid_superblock(device), "RAID superblock")
    } else {
        Finding::Skipped("mdadm")
    };

    DeviceSnapshot {
        exists: true,
        partitions: list_partitions(host, device),
        signatures,
        lvm,
        raid,
    }
}
