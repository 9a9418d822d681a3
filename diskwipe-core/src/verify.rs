//! Final verification, run once after every device has been wiped.
//!
//! Kernel partition state can lag behind on-disk changes, so all devices are
//! refreshed first and given time to settle before any of them is checked.
use crate::device::DeviceRef;
use crate::error::{Result, WipeError};
use crate::host::BlockHost;
use crate::probe::{self, DeviceSnapshot};
use crate::stages;
use crate::wipe::WipeConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Verification result for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVerification {
    pub device: DeviceRef,
    /// `None` when the device was absent at verification time.
    pub snapshot: Option<DeviceSnapshot>,
}

impl DeviceVerification {
    /// Absent devices and skipped checks do not count against the result.
    pub fn is_clean(&self) -> bool {
        self.snapshot.as_ref().is_none_or(DeviceSnapshot::is_clean)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub devices: Vec<DeviceVerification>,
}

impl VerificationReport {
    /// Logical AND over every check that was performed on every device.
    pub fn all_clean(&self) -> bool {
        self.devices.iter().all(DeviceVerification::is_clean)
    }
}

/// Re-probes each device and reports per-category cleanliness.
pub fn verify_all<H, F>(
    host: &H,
    paths: &[PathBuf],
    config: &WipeConfig,
    running: &AtomicBool,
    mut on_device: F,
) -> Result<VerificationReport>
where
    H: BlockHost + ?Sized,
    F: FnMut(&DeviceVerification),
{
    let mut ignored = Vec::new();
    for path in paths {
        if !running.load(Ordering::SeqCst) {
            return Err(WipeError::Interrupted);
        }
        let (device, _) = probe::resolve(host, path);
        if host.exists(device.target()) {
            stages::sync_kernel(host, device.target(), config.delays.interim, &mut ignored);
        }
    }
    host.pause(config.verify_settle);

    let mut report = VerificationReport::default();
    for path in paths {
        if !running.load(Ordering::SeqCst) {
            return Err(WipeError::Interrupted);
        }
        let (device, _) = probe::resolve(host, path);
        let snapshot = probe::snapshot(host, device.target());
        let verification = if snapshot.exists {
            if !snapshot.is_clean() {
                tracing::warn!(device = %device, "residual metadata found during verification");
            }
            DeviceVerification {
                device,
                snapshot: Some(snapshot),
            }
        } else {
            tracing::warn!(device = %device, "device not found, skipping verification");
            DeviceVerification {
                device,
                snapshot: None,
            }
        };
        on_device(&verification);
        report.devices.push(verification);
    }

    Ok(report)
}
