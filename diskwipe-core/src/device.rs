use std::fmt;
use std::path::{Path, PathBuf};

/// A whole disk discovered on the system.
///
/// Populated by the platform-specific inventory in [`crate::platform`] and used
/// to propose wipe targets. Wiping itself only needs a [`DeviceRef`].
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    /// The system path to the disk (e.g., `/dev/sda`).
    pub path: PathBuf,
    /// The kernel-provided name of the disk (e.g., "sda").
    pub name: String,
    /// The total size of the disk in bytes.
    pub size_bytes: u64,
    /// Transport reported by the kernel (`sata`, `nvme`, `usb`, ...), if any.
    pub transport: Option<String>,
    /// Model string, if the disk reports one.
    pub model: Option<String>,
    /// Attached over a removable transport such as USB.
    pub removable: bool,
    /// Holds the running system's root filesystem.
    pub system: bool,
}

impl Device {
    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = match (self.removable, self.system) {
            (_, true) => " [system disk]",
            (true, false) => " [removable]",
            (false, false) => "",
        };

        write!(
            f,
            "{:<15} {:>8.1} GB  {:<6} {}{}",
            self.path.display(),
            self.size_gb(),
            self.transport.as_deref().unwrap_or("-"),
            self.model.as_deref().unwrap_or(""),
            tags
        )
    }
}

/// A device as named by the user together with where it actually points.
///
/// Destructive operations always use [`DeviceRef::target`], the resolved path,
/// so a `/dev/disk/by-id/...` link that moves mid-run cannot redirect a wipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRef {
    given: PathBuf,
    resolved: PathBuf,
}

impl DeviceRef {
    pub fn new(given: impl Into<PathBuf>, resolved: impl Into<PathBuf>) -> Self {
        Self {
            given: given.into(),
            resolved: resolved.into(),
        }
    }

    /// The path as the user supplied it.
    pub fn given(&self) -> &Path {
        &self.given
    }

    /// The canonical device path every operation acts on.
    pub fn target(&self) -> &Path {
        &self.resolved
    }

    /// Whether the given path was a link to somewhere else.
    pub fn is_alias(&self) -> bool {
        self.given != self.resolved
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_alias() {
            write!(f, "{} -> {}", self.given.display(), self.resolved.display())
        } else {
            write!(f, "{}", self.given.display())
        }
    }
}
