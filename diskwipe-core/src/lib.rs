//! The core, UI-agnostic library for the `diskwipe` disk sanitizer.
//!
//! `diskwipe-core` takes block devices back to a blank state: no RAID
//! membership, no LVM or ZFS labels, no filesystem signatures, no partition
//! table, and a kernel that agrees there are no partitions. It does not
//! overwrite user data beyond the partition table areas.
//!
//! The library is structured into several key modules:
//! - [`host`]: The [`host::BlockHost`] capability trait every query and
//!   mutation goes through.
//! - [`platform`]: The Linux implementation of that trait, built on the
//!   standard command-line tools, plus disk inventory.
//! - [`probe`]: Read-only observation of partitions and leftover metadata.
//! - [`stages`]: The individual destructive steps of one wipe attempt.
//! - [`mod@wipe`]: The per-device attempt loop.
//! - [`verify`]: The final verification pass over every wiped device.
//! - [`select`] and [`preflight`]: Target selection, confirmation and startup
//!   checks for front-ends.
//!
//! The primary entry points are [`wipe::wipe_all`] and [`verify::verify_all`].
//! Both report progress via callbacks, so the calling application can display
//! it in any way it chooses, and both stop early once the shared `running`
//! flag is cleared.
//!
//! ## Example: Wiping a Disk with Progress Reporting
//!
//! ```rust,no_run
//! use diskwipe_core::{platform::LinuxHost, verify, wipe::{self, WipeConfig, WipeEvent}};
//! use std::path::PathBuf;
//! use std::sync::atomic::AtomicBool;
//!
//! fn main() -> diskwipe_core::error::Result<()> {
//!     let host = LinuxHost::new();
//!     let config = WipeConfig::default();
//!     let running = AtomicBool::new(true);
//!     let targets = vec![PathBuf::from("/dev/sdb")];
//!
//!     let results = wipe::wipe_all(&host, &targets, &config, &running, |event| {
//!         if let WipeEvent::StageStarted(stage) = event {
//!             println!("{stage}...");
//!         }
//!     })?;
//!
//!     let report = verify::verify_all(&host, &targets, &config, &running, |_| {})?;
//!     println!(
//!         "{} of {} devices wiped, verification {}",
//!         results.iter().filter(|r| r.succeeded()).count(),
//!         results.len(),
//!         if report.all_clean() { "passed" } else { "found residue" },
//!     );
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod device;
pub mod error;
pub mod host;
pub mod platform;
pub mod preflight;
pub mod probe;
pub mod select;
pub mod stages;
pub mod verify;
pub mod wipe;
