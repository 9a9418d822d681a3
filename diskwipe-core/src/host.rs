//! The capability interface the wipe pipeline talks to.
//!
//! One method per external query or mutation. Each returns a structured
//! `Result` instead of aborting, so the stages can decide which failures matter
//! (almost none do). [`crate::platform::LinuxHost`] implements this over real
//! tools; the integration tests implement it over an in-memory model of disks.
use crate::error::CommandError;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type HostResult<T> = Result<T, CommandError>;

/// An active software RAID array as listed by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdArray {
    /// Array device, e.g. `/dev/md127`.
    pub device: PathBuf,
    /// Kernel names of the member devices, e.g. `sda1`.
    pub members: Vec<String>,
}

/// A node below a disk in the block topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub path: PathBuf,
    /// Node type as the kernel reports it (`part`, `raid1`, `lvm`, `crypt`, ...).
    pub kind: String,
}

impl BlockNode {
    pub fn new(path: impl Into<PathBuf>, kind: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
        }
    }

    /// A real partition of the disk, as opposed to a device stacked on top
    /// that may span other disks.
    pub fn is_partition(&self) -> bool {
        self.kind == "part"
    }
}

/// A contiguous range of 512-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub first_sector: u64,
    pub sectors: u64,
}

impl Region {
    /// Inclusive index of the last sector covered.
    pub fn last_sector(&self) -> u64 {
        self.first_sector + self.sectors.saturating_sub(1)
    }
}

pub trait BlockHost {
    // Queries.

    fn exists(&self, path: &Path) -> bool;

    /// Follows symlinks to the canonical device node.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Descendants of `device` in the block topology (partitions and anything
    /// stacked on them), possibly including `device` itself.
    fn children(&self, device: &Path) -> HostResult<Vec<BlockNode>>;

    /// Transport type reported for the disk, lowercased (`usb`, `sata`, ...).
    fn transport(&self, device: &Path) -> HostResult<String>;

    /// Stable identifier links (`/dev/disk/by-id/*`) that resolve to `device`.
    fn stable_id_links(&self, device: &Path) -> io::Result<Vec<PathBuf>>;

    /// Output of the signature probe, `None` if nothing was recognised.
    fn signatures(&self, device: &Path) -> HostResult<Option<String>>;

    /// Volume groups for which `device` is a physical volume.
    fn volume_groups(&self, device: &Path) -> HostResult<Vec<String>>;

    /// Whether `device` carries an LVM physical-volume label.
    fn has_pv_label(&self, device: &Path) -> HostResult<bool>;

    /// Whether `device` carries a RAID superblock.
    fn has_raid_superblock(&self, device: &Path) -> HostResult<bool>;

    /// Arrays currently assembled by the kernel.
    fn md_arrays(&self) -> io::Result<Vec<MdArray>>;

    /// Device size in 512-byte sectors.
    fn sector_count(&self, device: &Path) -> HostResult<u64>;

    fn has_tool(&self, tool: &str) -> bool;

    // Mutations.

    fn stop_array(&self, array: &Path) -> HostResult<()>;
    fn unmount(&self, device: &Path) -> HostResult<()>;
    fn deactivate_volume_group(&self, group: &str) -> HostResult<()>;
    fn zero_raid_superblock(&self, device: &Path) -> HostResult<()>;
    fn remove_pv_label(&self, device: &Path) -> HostResult<()>;
    fn clear_zfs_label(&self, device: &Path) -> HostResult<()>;
    fn wipe_signatures(&self, device: &Path) -> HostResult<()>;
    /// Removes all entries from the partition table.
    fn delete_partitions(&self, device: &Path) -> HostResult<()>;
    /// Writes a fresh, empty GPT label over whatever table exists.
    fn write_empty_label(&self, device: &Path) -> HostResult<()>;
    /// Destroys primary and backup GPT and MBR structures.
    fn zap_partition_tables(&self, device: &Path) -> HostResult<()>;
    fn zero_region(&self, device: &Path, region: Region) -> HostResult<()>;
    fn reread_partition_table(&self, device: &Path) -> HostResult<()>;
    fn reprobe_partitions(&self, device: &Path) -> HostResult<()>;
    /// Waits for the device manager's event queue to drain.
    fn settle(&self) -> HostResult<()>;

    /// Blocks the pipeline for `duration`.
    fn pause(&self, duration: Duration);
}
