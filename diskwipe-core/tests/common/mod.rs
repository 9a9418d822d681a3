//! Shared test infrastructure: an in-memory model of block devices.
//!
//! [`FakeHost`] implements `BlockHost` without touching the system. Each disk
//! keeps an on-disk partition table and a separate kernel view of it; only a
//! successful re-read copies one into the other, which is how stale kernel
//! state is simulated. Every mutation is appended to an operation log so tests
//! can assert on order.
#![allow(dead_code)]

use diskwipe_core::error::{CommandError, ExitStatusText};
use diskwipe_core::host::{BlockHost, BlockNode, HostResult, MdArray, Region};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const ALL_TOOLS: [&str; 16] = [
    "wipefs", "sgdisk", "lsblk", "blkid", "dd", "blockdev", "partprobe", "sfdisk", "parted", "mdadm",
    "pvs", "vgchange", "pvremove", "zpool", "udevadm", "umount",
];

fn failed(command: &str, stderr: &str) -> CommandError {
    CommandError::Failed {
        command: command.to_string(),
        status: ExitStatusText(Some(1)),
        stderr: stderr.to_string(),
    }
}

/// One simulated whole disk.
#[derive(Debug, Clone)]
pub struct FakeDisk {
    pub path: PathBuf,
    pub sectors: Option<u64>,
    pub transport: String,
    pub links: Vec<PathBuf>,
    /// Partitions recorded in the on-disk table.
    pub table: Vec<PathBuf>,
    /// Partitions the kernel currently lists.
    pub kernel: Vec<PathBuf>,
    /// Devices assembled on top of the partitions (arrays, mapper volumes).
    /// While any exist the kernel refuses to re-read the table.
    pub stacked: Vec<BlockNode>,
    /// Signature probe output keyed by the disk or partition it sits on.
    pub signatures: BTreeMap<PathBuf, String>,
    /// Physical volumes and the volume group each belongs to.
    pub physical_volumes: BTreeMap<PathBuf, String>,
    pub raid_members: BTreeSet<PathBuf>,
    pub zfs_labels: BTreeSet<PathBuf>,
    pub mounted: BTreeSet<PathBuf>,
    /// Re-reads fail as busy until this many table zaps have happened.
    pub busy_until_zaps: u32,
    pub zaps: u32,
    /// `sfdisk --delete` reports success without changing the table.
    pub sfdisk_ineffective: bool,
    /// The topology query fails.
    pub children_fail: bool,
}

impl FakeDisk {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.into(),
            sectors: Some(1_000_000),
            transport: "sata".into(),
            links: Vec::new(),
            table: Vec::new(),
            kernel: Vec::new(),
            stacked: Vec::new(),
            signatures: BTreeMap::new(),
            physical_volumes: BTreeMap::new(),
            raid_members: BTreeSet::new(),
            zfs_labels: BTreeSet::new(),
            mounted: BTreeSet::new(),
            busy_until_zaps: 0,
            zaps: 0,
            sfdisk_ineffective: false,
            children_fail: false,
        }
    }

    pub fn partition(mut self, part: &str) -> Self {
        self.table.push(part.into());
        self.kernel.push(part.into());
        self
    }

    /// A partition the kernel still lists although the table no longer has it.
    pub fn stale_partition(mut self, part: &str) -> Self {
        self.kernel.push(part.into());
        self
    }

    pub fn stacked(mut self, path: &str, kind: &str) -> Self {
        self.stacked.push(BlockNode::new(path, kind));
        self
    }

    pub fn signature(mut self, on: &str, found: &str) -> Self {
        self.signatures.insert(on.into(), found.into());
        self
    }

    pub fn physical_volume(mut self, on: &str, group: &str) -> Self {
        self.physical_volumes.insert(on.into(), group.into());
        self.signatures.insert(on.into(), "TYPE=\"LVM2_member\"".into());
        self
    }

    pub fn raid_member(mut self, on: &str) -> Self {
        self.raid_members.insert(on.into());
        self
    }

    pub fn zfs_label(mut self, on: &str) -> Self {
        self.zfs_labels.insert(on.into());
        self
    }

    pub fn mounted(mut self, part: &str) -> Self {
        self.mounted.insert(part.into());
        self
    }

    pub fn sectors(mut self, sectors: Option<u64>) -> Self {
        self.sectors = sectors;
        self
    }

    pub fn usb(mut self) -> Self {
        self.transport = "usb".into();
        self
    }

    pub fn busy_until_zaps(mut self, zaps: u32) -> Self {
        self.busy_until_zaps = zaps;
        self
    }

    pub fn sfdisk_ineffective(mut self) -> Self {
        self.sfdisk_ineffective = true;
        self
    }

    pub fn children_fail(mut self) -> Self {
        self.children_fail = true;
        self
    }

    fn owns(&self, path: &Path) -> bool {
        self.path == path
            || self.kernel.iter().any(|p| p == path)
            || self.stacked.iter().any(|n| n.path == path)
    }
}

#[derive(Debug, Default)]
struct State {
    disks: HashMap<PathBuf, FakeDisk>,
    arrays: Vec<MdArray>,
    aliases: HashMap<PathBuf, PathBuf>,
    tools: BTreeSet<String>,
    ops: Vec<String>,
    pauses: Vec<Duration>,
}

impl State {
    fn owner(&mut self, path: &Path) -> Option<&mut FakeDisk> {
        self.disks.values_mut().find(|d| d.owns(path))
    }

    fn record(&mut self, op: &str, path: &Path) {
        self.ops.push(format!("{op} {}", path.display()));
    }
}

pub struct FakeHost {
    state: Mutex<State>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// A host with every tool installed and no disks.
    pub fn new() -> Self {
        let state = State {
            tools: ALL_TOOLS.iter().map(|t| t.to_string()).collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_disk(self, disk: FakeDisk) -> Self {
        self.state
            .lock()
            .unwrap()
            .disks
            .insert(disk.path.clone(), disk);
        self
    }

    pub fn with_array(self, device: &str, members: &[&str]) -> Self {
        self.state.lock().unwrap().arrays.push(MdArray {
            device: device.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn with_alias(self, link: &str, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(link.into(), target.into());
        self
    }

    pub fn without_tool(self, tool: &str) -> Self {
        self.state.lock().unwrap().tools.remove(tool);
        self
    }

    pub fn disk(&self, path: &str) -> FakeDisk {
        self.state.lock().unwrap().disks[Path::new(path)].clone()
    }

    pub fn arrays(&self) -> Vec<MdArray> {
        self.state.lock().unwrap().arrays.clone()
    }

    /// Every mutation so far, as `"<op> <path>"`.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn count_ops(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| o.as_str() == op).count()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.state.lock().unwrap().pauses.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.ops.clear();
        state.pauses.clear();
    }

    /// Applies `change` to whichever disk owns `path`, failing like the real
    /// tool would when no such device exists.
    fn mutate_owner(
        &self,
        op: &str,
        path: &Path,
        change: impl FnOnce(&mut FakeDisk) -> HostResult<()>,
    ) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record(op, path);
        match state.owner(path) {
            Some(disk) => change(disk),
            None => Err(failed(op, "No such file or directory")),
        }
    }
}

impl BlockHost for FakeHost {
    fn exists(&self, path: &Path) -> bool {
        let mut state = self.state.lock().unwrap();
        state.owner(path).is_some() || state.arrays.iter().any(|a| a.device == path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = state.aliases.get(path) {
            return Ok(target.clone());
        }
        match state.owner(path) {
            Some(_) => Ok(path.to_path_buf()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn children(&self, device: &Path) -> HostResult<Vec<BlockNode>> {
        let state = self.state.lock().unwrap();
        let disk = state
            .disks
            .get(device)
            .ok_or_else(|| failed("lsblk", "not a block device"))?;
        if disk.children_fail {
            return Err(CommandError::TimedOut {
                command: "lsblk".into(),
                timeout: Duration::from_secs(30),
            });
        }
        let mut all = vec![BlockNode::new(device, "disk")];
        all.extend(disk.kernel.iter().map(|p| BlockNode::new(p.clone(), "part")));
        all.extend(disk.stacked.iter().cloned());
        Ok(all)
    }

    fn transport(&self, device: &Path) -> HostResult<String> {
        let state = self.state.lock().unwrap();
        state
            .disks
            .get(device)
            .map(|d| d.transport.clone())
            .ok_or_else(|| failed("lsblk", "not a block device"))
    }

    fn stable_id_links(&self, device: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .disks
            .get(device)
            .map(|d| d.links.clone())
            .unwrap_or_default())
    }

    fn signatures(&self, device: &Path) -> HostResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let disk = state
            .owner(device)
            .ok_or_else(|| failed("blkid", "No such file or directory"))?;
        Ok(disk.signatures.get(device).cloned())
    }

    fn volume_groups(&self, device: &Path) -> HostResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let disk = state
            .owner(device)
            .ok_or_else(|| failed("pvs", "No such file or directory"))?;
        Ok(disk.physical_volumes.get(device).cloned().into_iter().collect())
    }

    fn has_pv_label(&self, device: &Path) -> HostResult<bool> {
        let mut state = self.state.lock().unwrap();
        let disk = state
            .owner(device)
            .ok_or_else(|| failed("pvs", "No such file or directory"))?;
        Ok(disk.physical_volumes.contains_key(device))
    }

    fn has_raid_superblock(&self, device: &Path) -> HostResult<bool> {
        let mut state = self.state.lock().unwrap();
        let disk = state
            .owner(device)
            .ok_or_else(|| failed("mdadm", "No such file or directory"))?;
        Ok(disk.raid_members.contains(device))
    }

    fn md_arrays(&self) -> io::Result<Vec<MdArray>> {
        Ok(self.arrays())
    }

    fn sector_count(&self, device: &Path) -> HostResult<u64> {
        let state = self.state.lock().unwrap();
        state
            .disks
            .get(device)
            .and_then(|d| d.sectors)
            .ok_or_else(|| failed("blockdev", "cannot get size"))
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.state.lock().unwrap().tools.contains(tool)
    }

    fn stop_array(&self, array: &Path) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.record("stop", array);
        if state.disks.values().any(|d| d.mounted.contains(array)) {
            return Err(failed("mdadm", "Cannot get exclusive access"));
        }
        let before = state.arrays.len();
        state.arrays.retain(|a| a.device != array);
        if state.arrays.len() == before {
            return Err(failed("mdadm", "no such array"));
        }
        for disk in state.disks.values_mut() {
            disk.stacked.retain(|n| n.path != array);
        }
        Ok(())
    }

    fn unmount(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("umount", device, |disk| {
            if disk.mounted.remove(device) {
                Ok(())
            } else {
                Err(failed("umount", "not mounted"))
            }
        })
    }

    fn deactivate_volume_group(&self, group: &str) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("vgchange {group}"));
        Ok(())
    }

    fn zero_raid_superblock(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("zero-superblock", device, |disk| {
            if disk.raid_members.remove(device) {
                Ok(())
            } else {
                Err(failed("mdadm", "Unrecognised md component device"))
            }
        })
    }

    fn remove_pv_label(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("pvremove", device, |disk| {
            if disk.physical_volumes.remove(device).is_some() {
                disk.signatures.remove(device);
                Ok(())
            } else {
                Err(failed("pvremove", "No PV label found"))
            }
        })
    }

    fn clear_zfs_label(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("labelclear", device, |disk| {
            if disk.zfs_labels.remove(device) {
                Ok(())
            } else {
                Err(failed("zpool", "no ZFS label"))
            }
        })
    }

    fn wipe_signatures(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("wipefs", device, |disk| {
            disk.signatures.remove(device);
            Ok(())
        })
    }

    fn delete_partitions(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("sfdisk", device, |disk| {
            if !disk.sfdisk_ineffective {
                disk.table.clear();
            }
            Ok(())
        })
    }

    fn write_empty_label(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("mklabel", device, |disk| {
            disk.table.clear();
            Ok(())
        })
    }

    fn zap_partition_tables(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("zap", device, |disk| {
            disk.table.clear();
            disk.zaps += 1;
            Ok(())
        })
    }

    fn zero_region(&self, device: &Path, region: Region) -> HostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!(
            "zero {} {}..{}",
            device.display(),
            region.first_sector,
            region.last_sector()
        ));
        match state.owner(device) {
            Some(_) => Ok(()),
            None => Err(failed("dd", "No such file or directory")),
        }
    }

    fn reread_partition_table(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("reread", device, |disk| {
            if disk.zaps < disk.busy_until_zaps || !disk.stacked.is_empty() {
                return Err(failed("blockdev", "Device or resource busy"));
            }
            disk.kernel = disk.table.clone();
            for gone in disk.mounted.clone() {
                if !disk.kernel.contains(&gone) {
                    disk.mounted.remove(&gone);
                }
            }
            Ok(())
        })
    }

    fn reprobe_partitions(&self, device: &Path) -> HostResult<()> {
        self.mutate_owner("partprobe", device, |_| Ok(()))
    }

    fn settle(&self) -> HostResult<()> {
        self.state.lock().unwrap().ops.push("settle".into());
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        self.state.lock().unwrap().pauses.push(duration);
    }
}
