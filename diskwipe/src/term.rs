//! Terminal state for the duration of a run.
#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::io::{IsTerminal, stdin};
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

/// Stops the terminal from echoing control characters while alive.
///
/// Without this a Ctrl+C during a wipe leaves `^C` glued to the front of
/// the "Cancelled by user" line. The previous settings come back on drop.
pub struct TermRestorer {
    #[cfg(unix)]
    saved: Option<Termios>,
}

#[cfg(unix)]
fn disable_echoctl(fd: i32) -> Option<Termios> {
    let saved = Termios::from_fd(fd).ok()?;
    let mut quiet = saved;
    quiet.c_lflag &= !ECHOCTL;
    tcsetattr(fd, TCSANOW, &quiet).ok()?;
    Some(saved)
}

impl TermRestorer {
    pub fn new() -> Self {
        #[cfg(unix)]
        {
            // Prompts read from stdin, so that is the terminal to adjust.
            let saved = if stdin().is_terminal() {
                disable_echoctl(stdin().as_raw_fd())
            } else {
                None
            };
            Self { saved }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(saved) = &self.saved {
            tcsetattr(stdin().as_raw_fd(), TCSANOW, saved).ok();
        }
    }
}
