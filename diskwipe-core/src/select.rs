//! Choosing which devices to wipe, and the typed confirmation before wiping.
//!
//! These are pure functions over the device inventory and the user's answers,
//! so the front-end only has to collect input and print.
use crate::device::Device;
use crate::error::{Result, WipeError};
use std::path::{Path, PathBuf};

/// Every device path must live under this prefix.
pub const DEVICE_PREFIX: &str = "/dev/";
/// Phrase for the first confirmation.
pub const WIPE_PHRASE: &str = "WIPE ALL DATA";
/// Phrase for the second confirmation and for protected-device overrides.
pub const FINAL_PHRASE: &str = "YES";

/// Why a disk is left out of the default selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Removable,
    System,
}

impl Protection {
    pub fn of(device: &Device) -> Option<Protection> {
        if device.system {
            Some(Protection::System)
        } else if device.removable {
            Some(Protection::Removable)
        } else {
            None
        }
    }
}

/// Devices proposed for wiping and devices held back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetProposal {
    pub defaults: Vec<PathBuf>,
    pub protected: Vec<(Device, Protection)>,
}

/// Proposes every fixed, non-system disk; removable and system disks are
/// protected.
pub fn propose_targets(inventory: &[Device]) -> TargetProposal {
    let mut proposal = TargetProposal::default();
    for device in inventory {
        match Protection::of(device) {
            Some(reason) => proposal.protected.push((device.clone(), reason)),
            None => proposal.defaults.push(device.path.clone()),
        }
    }
    proposal
}

pub fn has_device_prefix(path: &Path) -> bool {
    path.to_string_lossy().starts_with(DEVICE_PREFIX)
}

/// Checks a command-line device argument.
pub fn validate_argument(path: &Path, exists: bool) -> Result<()> {
    if !has_device_prefix(path) {
        return Err(WipeError::InvalidDevicePath(path.to_path_buf()));
    }
    if !exists {
        return Err(WipeError::DeviceNotFound(path.to_path_buf()));
    }
    Ok(())
}

/// The user's answer to the "which devices" prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub devices: Vec<PathBuf>,
    /// Entries that were not device paths.
    pub rejected: Vec<String>,
    pub used_defaults: bool,
}

/// Interprets typed input: empty means the defaults, otherwise
/// whitespace-separated device paths.
pub fn parse_selection(input: &str, defaults: &[PathBuf]) -> Selection {
    let input = input.trim();
    if input.is_empty() {
        return Selection {
            devices: defaults.to_vec(),
            rejected: Vec::new(),
            used_defaults: true,
        };
    }

    let mut selection = Selection::default();
    for word in input.split_whitespace() {
        if word.starts_with(DEVICE_PREFIX) {
            let path = PathBuf::from(word);
            if !selection.devices.contains(&path) {
                selection.devices.push(path);
            }
        } else {
            selection.rejected.push(word.to_string());
        }
    }
    selection
}

/// Whether a typed override answer lets a protected device through.
pub fn override_accepted(answer: &str) -> bool {
    answer == FINAL_PHRASE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Rejected,
}

/// The two-step typed confirmation.
///
/// `ask` receives the phrase the user has to type and returns what they
/// typed. The second question is only asked if the first answer matched.
pub fn confirm_wipe<E, F>(mut ask: F) -> std::result::Result<Approval, E>
where
    F: FnMut(&'static str) -> std::result::Result<String, E>,
{
    for phrase in [WIPE_PHRASE, FINAL_PHRASE] {
        if ask(phrase)? != phrase {
            return Ok(Approval::Rejected);
        }
    }
    Ok(Approval::Approved)
}
