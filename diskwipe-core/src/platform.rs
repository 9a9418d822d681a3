//! Provides platform-specific functionality.
//!
//! Only Linux exposes the block topology and tool set the wipe relies on, so
//! this is the only implementation. It provides [`LinuxHost`], the real
//! [`crate::host::BlockHost`], together with disk inventory for target
//! selection.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
