//! Runs external system tools with a bounded timeout.
//!
//! Every call captures the child's exit code, stdout and stderr. A non-zero exit
//! is *not* an error for [`Runner::run`]; callers decide what it means. The
//! strict variant [`run_checked`] is used for startup preconditions where a
//! failing tool must stop the program.
use crate::error::{CommandError, ExitStatusText};
use std::env;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Time budgets for the two classes of command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Queries and metadata mutations.
    pub query: Duration,
    /// Commands that write raw bytes to a device.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(30),
            write: Duration::from_secs(60),
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stdout if the command succeeded and printed something.
    pub fn non_empty_stdout(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (self.success() && !out.is_empty()).then_some(out)
    }
}

/// Something that can execute an argv with a timeout.
///
/// The real implementation is [`SystemRunner`]; tests substitute a scripted one
/// to check which commands would be issued.
pub trait Runner {
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError>;

    /// Whether `tool` can be found on `PATH`.
    fn has_tool(&self, tool: &str) -> bool;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, argv: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CommandError::Unparseable {
                command: String::new(),
                detail: "empty command line".into(),
            })?;
        let command = argv.join(" ");
        tracing::debug!(%command, ?timeout, "running");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => CommandError::ToolMissing((*program).to_string()),
                _ => CommandError::Io {
                    command: command.clone(),
                    source: e,
                },
            })?;

        // Drain both pipes on helper threads so a chatty child cannot block on
        // a full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let code = match wait_with_deadline(&mut child, timeout) {
            Ok(Some(code)) => code,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(%command, "killed after timeout");
                return Err(CommandError::TimedOut { command, timeout });
            }
            Err(source) => return Err(CommandError::Io { command, source }),
        };

        let output = CommandOutput {
            code,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        tracing::trace!(%command, code = ?output.code, stdout = %output.stdout.trim(), "finished");
        Ok(output)
    }

    fn has_tool(&self, tool: &str) -> bool {
        find_in_path(tool)
    }
}

/// Polls `child` until it exits or `timeout` elapses. `Ok(None)` means timeout.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<Option<i32>>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.code()));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn find_in_path(tool: &str) -> bool {
    if tool.contains('/') {
        return is_executable(Path::new(tool));
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(tool))))
        .unwrap_or(false)
}

/// Strict mode: a non-zero exit becomes [`CommandError::Failed`].
pub fn run_checked<R: Runner + ?Sized>(
    runner: &R,
    argv: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let output = runner.run(argv, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(CommandError::Failed {
            command: argv.join(" "),
            status: ExitStatusText(output.code),
            stderr: output.stderr.trim().to_string(),
        })
    }
}
