//! Error types shared by the core library.
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single external command.
///
/// Inside the wipe stages these are expected and swallowed: a device may be in
/// any prior state, so "nothing to remove" regularly surfaces as a non-zero exit.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program is not installed or not on `PATH`.
    #[error("`{0}` is not installed")]
    ToolMissing(String),

    /// The program ran but exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: ExitStatusText,
        stderr: String,
    },

    /// The program did not finish within its time budget and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    /// The program produced output we could not interpret.
    #[error("unexpected output from `{command}`: {detail}")]
    Unparseable { command: String, detail: String },

    #[error("I/O error running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Printable form of a process exit status (`exit 3`, `killed by signal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusText(pub Option<i32>);

impl std::fmt::Display for ExitStatusText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit {code}"),
            None => f.write_str("killed by signal"),
        }
    }
}

/// Errors that stop the whole run.
#[derive(Error, Debug)]
pub enum WipeError {
    #[error("this tool must be run as root")]
    NotRoot,

    #[error("missing required tools: {}. Install them first.", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("invalid device path (must start with /dev/): {}", .0.display())]
    InvalidDevicePath(PathBuf),

    #[error("device does not exist: {}", .0.display())]
    DeviceNotFound(PathBuf),

    #[error("no valid devices specified")]
    NoTargets,

    #[error("operation interrupted by user")]
    Interrupted,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, WipeError>;
