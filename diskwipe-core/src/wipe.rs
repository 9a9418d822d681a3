//! Drives the stage sequence against one device until it is clean or the
//! attempt budget runs out.
//!
//! The attempt loop is a small state machine:
//!
//! ```text
//! pending -> attempting(1) -> ... -> attempting(n) -> clean
//!                                                  \-> exhausted   (n == max)
//! ```
//!
//! A device that does not exist when its turn comes is reported as vacuously
//! clean and never enters the loop. Progress is reported through an event
//! callback so any front-end can render it.
use crate::device::DeviceRef;
use crate::error::{Result, WipeError};
use crate::host::BlockHost;
use crate::probe::{self, PartitionState};
use crate::stages::{self, SettleDelays, Stage, StageContext, StageReport};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Tunables for the wipe and verification passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipeConfig {
    /// Full stage passes allowed per device.
    pub max_attempts: u32,
    /// Wait between a failed attempt and the next one.
    pub retry_backoff: Duration,
    pub delays: SettleDelays,
    /// Extra wait after refreshing every device before verification.
    pub verify_settle: Duration,
}

impl Default for WipeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            delays: SettleDelays::default(),
            verify_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WipeState {
    Pending,
    Attempting(u32),
    Clean { attempts: u32 },
    Exhausted { attempts: u32, remaining: PartitionState },
}

impl WipeState {
    /// Transition taken after attempt `n` observed `post` as the partition state.
    pub fn after_attempt(n: u32, post: PartitionState, max_attempts: u32) -> WipeState {
        match post {
            PartitionState::Clean => WipeState::Clean { attempts: n },
            remaining if n >= max_attempts => WipeState::Exhausted {
                attempts: n,
                remaining,
            },
            _ => WipeState::Attempting(n + 1),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WipeState::Clean { .. } | WipeState::Exhausted { .. })
    }
}

/// Final status of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WipeOutcome {
    Clean { attempts: u32 },
    /// The device was not there; nothing to do.
    Absent,
    Exhausted { attempts: u32, remaining: PartitionState },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeResult {
    pub device: DeviceRef,
    pub outcome: WipeOutcome,
}

impl WipeResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, WipeOutcome::Exhausted { .. })
    }
}

/// Progress notifications emitted while wiping.
#[derive(Debug)]
pub enum WipeEvent<'a> {
    DeviceStarted(&'a DeviceRef),
    /// Resolution failed; the given path is used as is.
    ResolveWarning(&'a str),
    DeviceMissing(&'a DeviceRef),
    AttemptStarted { attempt: u32, max_attempts: u32 },
    StageStarted(Stage),
    StageFinished(&'a StageReport),
    Retrying { attempt: u32, max_attempts: u32, remaining: &'a PartitionState },
    DeviceFinished(&'a WipeResult),
}

fn check_running(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(WipeError::Interrupted)
    }
}

/// Runs every stage once. Returns the partition state observed afterwards.
pub fn wipe_once<H, F>(
    host: &H,
    device: &DeviceRef,
    config: &WipeConfig,
    running: &AtomicBool,
    on_event: &mut F,
) -> Result<PartitionState>
where
    H: BlockHost + ?Sized,
    F: FnMut(WipeEvent<'_>),
{
    let target = device.target();
    let mut below = probe::descendants(host, target);

    for stage in Stage::ALL {
        check_running(running)?;
        on_event(WipeEvent::StageStarted(stage));
        let ctx = StageContext {
            device: target,
            descendants: &below,
            delays: config.delays,
        };
        let report = stages::execute(host, stage, &ctx);
        on_event(WipeEvent::StageFinished(&report));

        // Stopped arrays drop out of the topology; per-partition stages
        // should only see what is left.
        if stage == Stage::StopRaid {
            below = probe::descendants(host, target);
        }
    }

    Ok(probe::list_partitions(host, target))
}

/// Wipes one device, retrying the full stage sequence up to
/// [`WipeConfig::max_attempts`] times.
///
/// # Errors
///
/// Only [`WipeError::Interrupted`]: every device-level problem is reported in
/// the returned [`WipeResult`] instead.
pub fn wipe_device<H, F>(
    host: &H,
    device: &DeviceRef,
    config: &WipeConfig,
    running: &AtomicBool,
    on_event: &mut F,
) -> Result<WipeResult>
where
    H: BlockHost + ?Sized,
    F: FnMut(WipeEvent<'_>),
{
    on_event(WipeEvent::DeviceStarted(device));

    if !host.exists(device.target()) {
        tracing::warn!(device = %device, "device not found, skipping");
        on_event(WipeEvent::DeviceMissing(device));
        let result = WipeResult {
            device: device.clone(),
            outcome: WipeOutcome::Absent,
        };
        on_event(WipeEvent::DeviceFinished(&result));
        return Ok(result);
    }

    let max_attempts = config.max_attempts.max(1);
    let mut state = WipeState::Pending;
    loop {
        state = match state {
            WipeState::Pending => WipeState::Attempting(1),
            WipeState::Attempting(n) => {
                check_running(running)?;
                on_event(WipeEvent::AttemptStarted {
                    attempt: n,
                    max_attempts,
                });
                let post = wipe_once(host, device, config, running, on_event)?;
                tracing::debug!(device = %device, attempt = n, state = %post, "attempt finished");
                let next = WipeState::after_attempt(n, post.clone(), max_attempts);
                if let WipeState::Attempting(_) = next {
                    on_event(WipeEvent::Retrying {
                        attempt: n,
                        max_attempts,
                        remaining: &post,
                    });
                    host.pause(config.retry_backoff);
                }
                next
            }
            WipeState::Clean { attempts } => {
                let result = WipeResult {
                    device: device.clone(),
                    outcome: WipeOutcome::Clean { attempts },
                };
                on_event(WipeEvent::DeviceFinished(&result));
                return Ok(result);
            }
            WipeState::Exhausted { attempts, remaining } => {
                tracing::warn!(
                    device = %device,
                    attempts,
                    remaining = %remaining,
                    "partitions still present after all attempts"
                );
                let result = WipeResult {
                    device: device.clone(),
                    outcome: WipeOutcome::Exhausted { attempts, remaining },
                };
                on_event(WipeEvent::DeviceFinished(&result));
                return Ok(result);
            }
        };
    }
}

/// Resolves and wipes each path in turn.
///
/// A device that cannot be cleaned never stops the others; only an
/// interruption ends the run early.
pub fn wipe_all<H, F>(
    host: &H,
    paths: &[PathBuf],
    config: &WipeConfig,
    running: &AtomicBool,
    mut on_event: F,
) -> Result<Vec<WipeResult>>
where
    H: BlockHost + ?Sized,
    F: FnMut(WipeEvent<'_>),
{
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        check_running(running)?;
        let (device, warning) = probe::resolve(host, path);
        if let Some(warning) = warning.as_deref() {
            on_event(WipeEvent::ResolveWarning(warning));
        }
        results.push(wipe_device(host, &device, config, running, &mut on_event)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_post_condition_ends_the_loop() {
        assert_eq!(
            WipeState::after_attempt(1, PartitionState::Clean, 3),
            WipeState::Clean { attempts: 1 }
        );
    }

    #[test]
    fn residue_retries_until_budget() {
        let left = PartitionState::Residual(vec!["/dev/sdb1".into()]);
        assert_eq!(
            WipeState::after_attempt(1, left.clone(), 3),
            WipeState::Attempting(2)
        );
        assert_eq!(
            WipeState::after_attempt(2, left.clone(), 3),
            WipeState::Attempting(3)
        );
        assert_eq!(
            WipeState::after_attempt(3, left.clone(), 3),
            WipeState::Exhausted {
                attempts: 3,
                remaining: left
            }
        );
    }

    #[test]
    fn unknown_partitions_are_never_clean() {
        let unknown = PartitionState::Unknown("lsblk timed out".into());
        assert_eq!(
            WipeState::after_attempt(1, unknown.clone(), 3),
            WipeState::Attempting(2)
        );
        assert!(WipeState::after_attempt(3, unknown, 3).is_terminal());
    }

    #[test]
    fn defaults_match_documented_budget() {
        let config = WipeConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.delays.interim, Duration::from_secs(1));
        assert_eq!(config.delays.last, Duration::from_secs(3));
    }
}
