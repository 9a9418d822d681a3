use crate::command::{run_checked, CommandOutput, Runner, SystemRunner, Timeouts};
use crate::device::Device;
use crate::error::{CommandError, ExitStatusText};
use crate::host::{BlockHost, BlockNode, HostResult, MdArray, Region};
use crate::probe;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MDSTAT: &str = "/proc/mdstat";
const BY_ID_DIR: &str = "/dev/disk/by-id";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Helper to find the parent disk of a partition (e.g., /dev/sda1 -> /dev/sda).
/// This is used to find the system drive's parent for protection.
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") || path_str.starts_with("/dev/vd") {
        let trimmed = path_str.trim_end_matches(|c: char| c.is_ascii_digit());
        return PathBuf::from(trimmed);
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            let suffix = &path_str[index + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                return PathBuf::from(&path_str[..index]);
            }
        }
    }

    path.to_path_buf()
}

/// Finds the disk that holds the root filesystem, if it can be determined.
fn system_disk() -> Option<PathBuf> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| get_parent_device_path(&PathBuf::from("/dev/").join(disk.name())))
}

/// Block device access through the standard Linux tool set
/// (util-linux, gdisk, parted, mdadm, lvm2, udev).
pub struct LinuxHost<R = SystemRunner> {
    runner: R,
    timeouts: Timeouts,
}

impl LinuxHost<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner, Timeouts::default())
    }
}

impl Default for LinuxHost<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runner> LinuxHost<R> {
    pub fn with_runner(runner: R, timeouts: Timeouts) -> Self {
        Self { runner, timeouts }
    }

    /// Runs a query; the caller interprets the exit code.
    fn query(&self, argv: &[&str]) -> HostResult<CommandOutput> {
        self.runner.run(argv, self.timeouts.query)
    }

    /// Runs a mutation; a non-zero exit is an error.
    fn mutate(&self, argv: &[&str]) -> HostResult<()> {
        run_checked(&self.runner, argv, self.timeouts.query).map(|_| ())
    }

    /// Lists the whole disks on the system.
    ///
    /// Each disk is tagged as removable (USB transport or a USB stable
    /// identifier) and whether it holds the root filesystem.
    pub fn inventory(&self) -> HostResult<Vec<Device>> {
        let output = run_checked(
            &self.runner,
            &["lsblk", "-d", "-n", "-b", "-p", "-P", "-o", "NAME,TYPE,SIZE,TRAN,MODEL"],
            self.timeouts.query,
        )?;
        let system = system_disk();
        if system.is_none() {
            tracing::warn!("could not determine the system disk");
        }

        let mut devices = Vec::new();
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            let fields = parse_lsblk_pairs(line);
            if fields.get("TYPE").map(String::as_str) != Some("disk") {
                continue;
            }
            let Some(path) = fields.get("NAME").map(PathBuf::from) else {
                continue;
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let transport = fields
                .get("TRAN")
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty());
            let model = fields
                .get("MODEL")
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty());
            let size_bytes = fields
                .get("SIZE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);

            let removable = probe::removable_from(
                transport.clone().ok_or_else(|| CommandError::Unparseable {
                    command: "lsblk".into(),
                    detail: "no transport".into(),
                }),
                self.stable_id_links(&path),
            );

            devices.push(Device {
                system: system.as_deref() == Some(path.as_path()),
                path,
                name,
                size_bytes,
                transport,
                model,
                removable,
            });
        }

        Ok(devices)
    }

    /// A short human-readable table about one device.
    pub fn describe(&self, device: &Path) -> HostResult<String> {
        let dev = path_arg(device);
        run_checked(
            &self.runner,
            &["lsblk", "-o", "NAME,SIZE,MODEL,SERIAL", dev.as_str()],
            self.timeouts.query,
        )
        .map(|out| out.stdout.trim_end().to_string())
    }
}

impl<R: Runner> BlockHost for LinuxHost<R> {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn children(&self, device: &Path) -> HostResult<Vec<BlockNode>> {
        let dev = path_arg(device);
        let out = run_checked(
            &self.runner,
            &["lsblk", "-n", "-p", "-P", "-o", "NAME,TYPE", dev.as_str()],
            self.timeouts.query,
        )?;
        Ok(parse_children(&out.stdout))
    }

    fn transport(&self, device: &Path) -> HostResult<String> {
        let dev = path_arg(device);
        let out = run_checked(
            &self.runner,
            &["lsblk", "-d", "-n", "-o", "TRAN", dev.as_str()],
            self.timeouts.query,
        )?;
        Ok(out.stdout.trim().to_lowercase())
    }

    fn stable_id_links(&self, device: &Path) -> io::Result<Vec<PathBuf>> {
        links_to(Path::new(BY_ID_DIR), device)
    }

    fn signatures(&self, device: &Path) -> HostResult<Option<String>> {
        let dev = path_arg(device);
        let out = self.query(&["blkid", "-p", dev.as_str()])?;
        match out.code {
            // blkid exits 2 when nothing was recognised.
            Some(2) => Ok(None),
            Some(0) => Ok(out.non_empty_stdout().map(str::to_string)),
            _ => Err(CommandError::Failed {
                command: format!("blkid -p {dev}"),
                status: ExitStatusText(out.code),
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }

    fn volume_groups(&self, device: &Path) -> HostResult<Vec<String>> {
        let dev = path_arg(device);
        let out = self.query(&["pvs", "--noheadings", "-o", "vg_name", dev.as_str()])?;
        // pvs fails on devices that are not physical volumes.
        Ok(out
            .non_empty_stdout()
            .map(parse_volume_groups)
            .unwrap_or_default())
    }

    fn has_pv_label(&self, device: &Path) -> HostResult<bool> {
        let dev = path_arg(device);
        let out = self.query(&["pvs", "--noheadings", dev.as_str()])?;
        Ok(out.non_empty_stdout().is_some())
    }

    fn has_raid_superblock(&self, device: &Path) -> HostResult<bool> {
        let dev = path_arg(device);
        let out = self.query(&["mdadm", "--examine", dev.as_str()])?;
        Ok(out.success() && out.stdout.contains("Array UUID"))
    }

    fn md_arrays(&self) -> io::Result<Vec<MdArray>> {
        match fs::read_to_string(MDSTAT) {
            Ok(text) => Ok(parse_mdstat(&text)),
            // No md driver loaded means no arrays.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn sector_count(&self, device: &Path) -> HostResult<u64> {
        let dev = path_arg(device);
        let out = run_checked(
            &self.runner,
            &["blockdev", "--getsz", dev.as_str()],
            self.timeouts.query,
        )?;
        out.stdout
            .trim()
            .parse()
            .map_err(|_| CommandError::Unparseable {
                command: format!("blockdev --getsz {dev}"),
                detail: out.stdout.trim().to_string(),
            })
    }

    fn has_tool(&self, tool: &str) -> bool {
        self.runner.has_tool(tool)
    }

    fn stop_array(&self, array: &Path) -> HostResult<()> {
        self.mutate(&["mdadm", "--stop", path_arg(array).as_str()])
    }

    fn unmount(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["umount", "-f", path_arg(device).as_str()])
    }

    fn deactivate_volume_group(&self, group: &str) -> HostResult<()> {
        self.mutate(&["vgchange", "-an", group])
    }

    fn zero_raid_superblock(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["mdadm", "--zero-superblock", "--force", path_arg(device).as_str()])
    }

    fn remove_pv_label(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["pvremove", "-ff", "-y", path_arg(device).as_str()])
    }

    fn clear_zfs_label(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["zpool", "labelclear", "-f", path_arg(device).as_str()])
    }

    fn wipe_signatures(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["wipefs", "--all", "--force", path_arg(device).as_str()])
    }

    fn delete_partitions(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["sfdisk", "--delete", path_arg(device).as_str()])
    }

    fn write_empty_label(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["parted", "-s", path_arg(device).as_str(), "mklabel", "gpt"])
    }

    fn zap_partition_tables(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["sgdisk", "--zap-all", path_arg(device).as_str()])
    }

    fn zero_region(&self, device: &Path, region: Region) -> HostResult<()> {
        let of = format!("of={}", device.display());
        let seek = format!("seek={}", region.first_sector);
        let count = format!("count={}", region.sectors);
        run_checked(
            &self.runner,
            &[
                "dd",
                "if=/dev/zero",
                of.as_str(),
                "bs=512",
                seek.as_str(),
                count.as_str(),
                "conv=fsync",
            ],
            self.timeouts.write,
        )
        .map(|_| ())
    }

    fn reread_partition_table(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["blockdev", "--rereadpt", path_arg(device).as_str()])
    }

    fn reprobe_partitions(&self, device: &Path) -> HostResult<()> {
        self.mutate(&["partprobe", path_arg(device).as_str()])
    }

    fn settle(&self) -> HostResult<()> {
        self.mutate(&["udevadm", "settle", "--timeout=5"])
    }

    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The entries of `dir` that resolve to the same node as `device`.
/// A missing directory has no links; broken links are skipped.
fn links_to(dir: &Path, device: &Path) -> io::Result<Vec<PathBuf>> {
    let target = fs::canonicalize(device)?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut links: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|link| fs::canonicalize(link).is_ok_and(|p| p == target))
        .collect();
    links.sort();
    Ok(links)
}

/// Parses `lsblk -n -p -P -o NAME,TYPE` output into unique typed nodes, in
/// order. A node reached through several parents (an array spanning two
/// partitions of the same disk) is listed once.
pub(crate) fn parse_children(stdout: &str) -> Vec<BlockNode> {
    let mut seen: Vec<BlockNode> = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = parse_lsblk_pairs(line);
        let Some(name) = fields.remove("NAME").filter(|n| !n.is_empty()) else {
            continue;
        };
        let path = PathBuf::from(name);
        if seen.iter().any(|n| n.path == path) {
            continue;
        }
        seen.push(BlockNode::new(path, fields.remove("TYPE").unwrap_or_default()));
    }
    seen
}

/// Parses `pvs -o vg_name` output. Orphan physical volumes print an empty name.
pub(crate) fn parse_volume_groups(stdout: &str) -> Vec<String> {
    let mut groups: Vec<String> = Vec::new();
    for group in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !groups.iter().any(|g| g == group) {
            groups.push(group.to_string());
        }
    }
    groups
}

/// Parses the array lines of `/proc/mdstat`:
///
/// ```text
/// md0 : active raid1 sdb1[1] sda1[0]
/// md127 : inactive sdc[0](S)
/// ```
pub(crate) fn parse_mdstat(text: &str) -> Vec<MdArray> {
    text.lines()
        .filter(|line| line.starts_with("md"))
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            let members = rest
                .split_whitespace()
                .filter_map(|token| token.split_once('[').map(|(dev, _)| dev.to_string()))
                .filter(|dev| !dev.is_empty())
                .collect();
            Some(MdArray {
                device: PathBuf::from("/dev").join(name),
                members,
            })
        })
        .collect()
}

/// Parses one line of `lsblk -P` output (`KEY="value" KEY="value"`).
pub(crate) fn parse_lsblk_pairs(line: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut rest = line.trim();
    while let Some(eq) = rest.find("=\"") {
        let key = rest[..eq].trim().to_string();
        let after = &rest[eq + 2..];
        let Some(end) = after.find('"') else {
            break;
        };
        fields.insert(key, after[..end].replace("\\x20", " "));
        rest = &after[end + 1..];
    }
    fields
}
