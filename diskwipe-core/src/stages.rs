//! The destructive steps of one wipe attempt, in their fixed order.
//!
//! Every stage is best-effort. A device can arrive in any state, so most steps
//! are no-ops that fail ("no superblock found", "not a physical volume"); those
//! failures are collected into the [`StageReport`] and the sequence goes on.
//! Only the partition check at the end of an attempt decides the outcome.
use crate::error::CommandError;
use crate::host::{BlockHost, BlockNode, MdArray, Region};
use crate::probe::{self, PartitionState};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 2 MiB in 512-byte sectors: MBR, primary GPT header and entry array at the
/// start of a disk, backup GPT at the end.
pub const BOUNDARY_SECTORS: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StopRaid,
    Unmount,
    DeactivateLvm,
    RemoveRaidMetadata,
    RemoveLvmMetadata,
    RemoveZfsLabels,
    WipeSignatures,
    DeletePartitions,
    ZapPartitionTables,
    ZeroBoundaries,
    RereadPartitionTable,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::StopRaid,
        Stage::Unmount,
        Stage::DeactivateLvm,
        Stage::RemoveRaidMetadata,
        Stage::RemoveLvmMetadata,
        Stage::RemoveZfsLabels,
        Stage::WipeSignatures,
        Stage::DeletePartitions,
        Stage::ZapPartitionTables,
        Stage::ZeroBoundaries,
        Stage::RereadPartitionTable,
    ];

    /// Progress text shown while the stage runs.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::StopRaid => "Stopping RAID arrays",
            Stage::Unmount => "Unmounting partitions",
            Stage::DeactivateLvm => "Deactivating LVM",
            Stage::RemoveRaidMetadata => "Removing RAID metadata",
            Stage::RemoveLvmMetadata => "Removing LVM metadata",
            Stage::RemoveZfsLabels => "Removing ZFS labels",
            Stage::WipeSignatures => "Wiping filesystem signatures",
            Stage::DeletePartitions => "Deleting partitions",
            Stage::ZapPartitionTables => "Destroying partition tables",
            Stage::ZeroBoundaries => "Zeroing partition table areas",
            Stage::RereadPartitionTable => "Syncing kernel partition table",
        }
    }

    /// A tool without which the stage is skipped outright.
    pub fn required_tool(&self) -> Option<&'static str> {
        match self {
            Stage::StopRaid | Stage::RemoveRaidMetadata => Some("mdadm"),
            Stage::DeactivateLvm => Some("pvs"),
            Stage::RemoveLvmMetadata => Some("pvremove"),
            Stage::RemoveZfsLabels => Some("zpool"),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Sleeps after asking the kernel to re-read partition tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// After intermediate re-reads inside a stage.
    pub interim: Duration,
    /// After the final re-read that ends an attempt.
    pub last: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            interim: Duration::from_secs(1),
            last: Duration::from_secs(3),
        }
    }
}

/// What one stage did.
#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    /// Set when the stage did not run because its tool is missing.
    pub skipped: Option<&'static str>,
    /// Commands that failed; expected for most stages on most devices.
    pub failures: Vec<CommandError>,
    /// Anything worth telling the user (fallbacks taken, steps left out).
    pub note: Option<String>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            skipped: None,
            failures: Vec::new(),
            note: None,
        }
    }
}

/// The device under attack and what was found below it at the start of the
/// attempt.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub device: &'a Path,
    /// Everything below the device: partitions and anything stacked on them.
    pub descendants: &'a [BlockNode],
    pub delays: SettleDelays,
}

impl<'a> StageContext<'a> {
    /// Every node below the device, in topology order.
    pub fn descendants(&self) -> impl Iterator<Item = &'a Path> + 'a {
        self.descendants.iter().map(|n| n.path.as_path())
    }

    /// The device's own partitions. Stacked devices (arrays, mapper
    /// volumes) can span other disks and are never written to.
    pub fn partitions(&self) -> impl Iterator<Item = &'a Path> + 'a {
        self.descendants
            .iter()
            .filter(|n| n.is_partition())
            .map(|n| n.path.as_path())
    }
}

/// Runs a single stage against the device in `ctx`.
pub fn execute<H: BlockHost + ?Sized>(host: &H, stage: Stage, ctx: &StageContext<'_>) -> StageReport {
    let mut report = StageReport::new(stage);
    if let Some(tool) = stage.required_tool() {
        if !host.has_tool(tool) {
            report.skipped = Some(tool);
            return report;
        }
    }

    let device = ctx.device;
    let failures = &mut report.failures;
    match stage {
        Stage::StopRaid => stop_arrays(host, ctx, failures),
        // Topmost first: a filesystem on an array goes before its members.
        Stage::Unmount => {
            let below: Vec<&Path> = ctx.descendants().collect();
            for node in below.into_iter().rev() {
                collect(failures, host.unmount(node));
            }
        }
        Stage::DeactivateLvm => deactivate_volume_groups(host, ctx, failures),
        // Partitions before the whole device: clearing the parent while a
        // child array is still live makes the child operation fail.
        Stage::RemoveRaidMetadata => {
            for target in partitions_then_device(ctx) {
                collect(failures, host.zero_raid_superblock(target));
            }
        }
        Stage::RemoveLvmMetadata => {
            for target in partitions_then_device(ctx) {
                collect(failures, host.remove_pv_label(target));
            }
        }
        Stage::RemoveZfsLabels => {
            collect(failures, host.clear_zfs_label(device));
            for part in ctx.partitions() {
                collect(failures, host.clear_zfs_label(part));
            }
        }
        Stage::WipeSignatures => {
            for target in partitions_then_device(ctx) {
                collect(failures, host.wipe_signatures(target));
            }
        }
        Stage::DeletePartitions => {
            if delete_partitions(host, device, ctx.delays.interim, failures) {
                report.note = Some("partitions survived deletion, wrote an empty GPT label".into());
            }
        }
        Stage::ZapPartitionTables => collect(failures, host.zap_partition_tables(device)),
        Stage::ZeroBoundaries => report.note = zero_boundaries(host, device, failures),
        Stage::RereadPartitionTable => sync_kernel(host, device, ctx.delays.last, failures),
    }

    if !report.failures.is_empty() {
        tracing::debug!(
            device = %device.display(),
            stage = ?stage,
            failures = report.failures.len(),
            "stage finished with ignored failures"
        );
    }
    report
}

fn collect(failures: &mut Vec<CommandError>, result: Result<(), CommandError>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "ignored");
        failures.push(e);
    }
}

fn partitions_then_device<'a>(ctx: &StageContext<'a>) -> impl Iterator<Item = &'a Path> + 'a {
    ctx.partitions().chain(std::iter::once(ctx.device))
}

/// Whether `array` has the device or one of its descendants as a member.
pub fn array_references(array: &MdArray, device: &Path, descendants: &[BlockNode]) -> bool {
    let device_name = device.file_name();
    array.members.iter().any(|member| {
        device_name.is_some_and(|n| n == member.as_str())
            || descendants
                .iter()
                .any(|node| node.path.file_name().is_some_and(|n| n == member.as_str()))
    })
}

fn stop_arrays<H: BlockHost + ?Sized>(host: &H, ctx: &StageContext<'_>, failures: &mut Vec<CommandError>) {
    let arrays = match host.md_arrays() {
        Ok(arrays) => arrays,
        Err(source) => {
            failures.push(CommandError::Io {
                command: "read /proc/mdstat".into(),
                source,
            });
            return;
        }
    };

    for array in arrays
        .iter()
        .filter(|a| array_references(a, ctx.device, ctx.descendants))
    {
        tracing::info!(array = %array.device.display(), "stopping array");
        collect(failures, host.stop_array(&array.device));
    }
}

fn deactivate_volume_groups<H: BlockHost + ?Sized>(
    host: &H,
    ctx: &StageContext<'_>,
    failures: &mut Vec<CommandError>,
) {
    let mut groups: Vec<String> = Vec::new();
    for target in std::iter::once(ctx.device).chain(ctx.descendants()) {
        match host.volume_groups(target) {
            Ok(found) => {
                for group in found {
                    if !groups.contains(&group) {
                        groups.push(group);
                    }
                }
            }
            Err(e) => failures.push(e),
        }
    }
    for group in &groups {
        tracing::info!(%group, "deactivating volume group");
        collect(failures, host.deactivate_volume_group(group));
    }
}

/// Asks the kernel and udev to pick up partition table changes, then waits.
pub fn sync_kernel<H: BlockHost + ?Sized>(
    host: &H,
    device: &Path,
    wait: Duration,
    failures: &mut Vec<CommandError>,
) {
    collect(failures, host.reread_partition_table(device));
    collect(failures, host.reprobe_partitions(device));
    collect(failures, host.settle());
    host.pause(wait);
}

/// Phases of explicit partition deletion.
///
/// The primary method removes entries from the table. If the kernel still
/// lists partitions afterwards, the fallback writes a fresh empty label, which
/// replaces the table unconditionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePhase {
    Start,
    TriedPrimary,
    Checked(PartitionState),
    TriedFallback,
    Done { fallback_used: bool },
}

impl DeletePhase {
    /// Does the work of the current phase and returns the next one.
    pub fn advance<H: BlockHost + ?Sized>(
        self,
        host: &H,
        device: &Path,
        wait: Duration,
        failures: &mut Vec<CommandError>,
    ) -> DeletePhase {
        match self {
            DeletePhase::Start => {
                collect(failures, host.delete_partitions(device));
                sync_kernel(host, device, wait, failures);
                DeletePhase::TriedPrimary
            }
            DeletePhase::TriedPrimary => DeletePhase::Checked(probe::list_partitions(host, device)),
            DeletePhase::Checked(PartitionState::Clean) => DeletePhase::Done {
                fallback_used: false,
            },
            // Residual or unknown: rewrite the label to be sure.
            DeletePhase::Checked(_) => {
                collect(failures, host.write_empty_label(device));
                sync_kernel(host, device, wait, failures);
                DeletePhase::TriedFallback
            }
            DeletePhase::TriedFallback => DeletePhase::Done { fallback_used: true },
            done @ DeletePhase::Done { .. } => done,
        }
    }
}

/// Runs [`DeletePhase`] to completion. Returns whether the fallback was needed.
pub fn delete_partitions<H: BlockHost + ?Sized>(
    host: &H,
    device: &Path,
    wait: Duration,
    failures: &mut Vec<CommandError>,
) -> bool {
    let mut phase = DeletePhase::Start;
    loop {
        phase = phase.advance(host, device, wait, failures);
        if let DeletePhase::Done { fallback_used } = phase {
            return fallback_used;
        }
    }
}

/// The two regions to zero on a device of `total_sectors`, clamped to the
/// device. Without a sector count only the head is known.
pub fn boundary_regions(total_sectors: Option<u64>) -> (Region, Option<Region>) {
    match total_sectors {
        Some(total) => {
            let sectors = total.min(BOUNDARY_SECTORS);
            let head = Region {
                first_sector: 0,
                sectors,
            };
            let tail = Region {
                first_sector: total - sectors,
                sectors,
            };
            (head, Some(tail))
        }
        None => (
            Region {
                first_sector: 0,
                sectors: BOUNDARY_SECTORS,
            },
            None,
        ),
    }
}

fn zero_boundaries<H: BlockHost + ?Sized>(
    host: &H,
    device: &Path,
    failures: &mut Vec<CommandError>,
) -> Option<String> {
    let (total, note) = match host.sector_count(device) {
        Ok(total) => (Some(total), None),
        Err(e) => {
            let note = format!("could not determine size, end of disk not zeroed: {e}");
            failures.push(e);
            (None, Some(note))
        }
    };

    let (head, tail) = boundary_regions(total);
    collect(failures, host.zero_region(device, head));
    if let Some(tail) = tail {
        collect(failures, host.zero_region(device, tail));
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_fixed_order() {
        assert_eq!(Stage::ALL.first(), Some(&Stage::StopRaid));
        assert_eq!(Stage::ALL.last(), Some(&Stage::RereadPartitionTable));
        let delete = Stage::ALL.iter().position(|s| *s == Stage::DeletePartitions);
        let zap = Stage::ALL.iter().position(|s| *s == Stage::ZapPartitionTables);
        assert!(delete < zap);
    }

    #[test]
    fn boundary_regions_for_a_million_sectors() {
        let (head, tail) = boundary_regions(Some(1_000_000));
        assert_eq!((head.first_sector, head.last_sector()), (0, 4095));
        let tail = tail.unwrap();
        assert_eq!((tail.first_sector, tail.last_sector()), (995_904, 999_999));
    }

    #[test]
    fn boundary_regions_clamp_to_tiny_devices() {
        let (head, tail) = boundary_regions(Some(1000));
        assert_eq!(head.sectors, 1000);
        assert_eq!(tail, Some(Region { first_sector: 0, sectors: 1000 }));
    }

    #[test]
    fn unknown_size_zeroes_head_only() {
        let (head, tail) = boundary_regions(None);
        assert_eq!(head, Region { first_sector: 0, sectors: BOUNDARY_SECTORS });
        assert_eq!(tail, None);
    }

    #[test]
    fn array_membership_matches_device_or_partitions() {
        let array = MdArray {
            device: "/dev/md0".into(),
            members: vec!["sdb1".into(), "sdc1".into()],
        };
        let parts = [BlockNode::new("/dev/sdb1", "part")];
        assert!(array_references(&array, Path::new("/dev/sdb"), &parts));
        assert!(!array_references(&array, Path::new("/dev/sda"), &[BlockNode::new("/dev/sda1", "part")]));

        let whole = MdArray {
            device: "/dev/md1".into(),
            members: vec!["nvme0n1".into()],
        };
        assert!(array_references(&whole, Path::new("/dev/nvme0n1"), &[]));
    }

    #[test]
    fn metadata_stages_are_gated_on_their_tools() {
        let gated: Vec<_> = Stage::ALL
            .iter()
            .filter_map(|s| s.required_tool().map(|t| (*s, t)))
            .collect();
        assert_eq!(
            gated,
            vec![
                (Stage::StopRaid, "mdadm"),
                (Stage::DeactivateLvm, "pvs"),
                (Stage::RemoveRaidMetadata, "mdadm"),
                (Stage::RemoveLvmMetadata, "pvremove"),
                (Stage::RemoveZfsLabels, "zpool"),
            ]
        );
    }

    #[test]
    fn stacked_nodes_are_not_partitions() {
        let below = [
            BlockNode::new("/dev/sdb1", "part"),
            BlockNode::new("/dev/md0", "raid1"),
            BlockNode::new("/dev/sdb2", "part"),
        ];
        let ctx = StageContext {
            device: Path::new("/dev/sdb"),
            descendants: &below,
            delays: SettleDelays::default(),
        };
        let targets: Vec<&Path> = partitions_then_device(&ctx).collect();
        assert_eq!(
            targets,
            [Path::new("/dev/sdb1"), Path::new("/dev/sdb2"), Path::new("/dev/sdb")]
        );
        assert_eq!(ctx.descendants().count(), 3);
    }
}
