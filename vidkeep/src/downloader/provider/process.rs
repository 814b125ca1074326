//! Child process supervision.

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with a status code (`None` if killed by a signal).
    Exited(Option<i32>),
    /// Killed because the token was cancelled.
    Killed,
    /// Waiting on the process failed.
    WaitFailed,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

/// Start the command in a process group of its own.
///
/// Helpers the child spawns (yt-dlp runs ffmpeg to merge formats) join that
/// group, so killing the group on cancellation takes them down too.
pub fn own_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    command.process_group(0);
    command
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Some(pgid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: plain signal delivery, no memory is shared with the callee.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the child never led a group, or it is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, "Failed to kill process group: {}", err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Spawn a task that waits for `child` and reports how it ended.
///
/// When `cancel` fires first the process (and its process group, see
/// [`own_process_group`]) is killed and reaped.
pub fn spawn_process_waiter(
    mut child: Child,
    cancel: CancellationToken,
) -> oneshot::Receiver<ProcessExit> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit = tokio::select! {
            _ = cancel.cancelled() => {
                kill_process_group(&child);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill process: {}", e);
                }
                ProcessExit::Killed
            }
            status = child.wait() => match status {
                Ok(status) => {
                    if let Some(code) = status.code()
                        && code != 0
                    {
                        warn!("Process exited with code: {}", code);
                    }
                    ProcessExit::Exited(status.code())
                }
                Err(e) => {
                    error!("Error waiting for process: {}", e);
                    ProcessExit::WaitFailed
                }
            },
        };
        let _ = tx.send(exit);
    });

    rx
}
