//! Small process-related helpers shared across the workspace.
//!
//! Besides hiding console windows on Windows, this crate owns the
//! terminate-then-kill sequence used to stop external tools that cannot
//! observe cancellation themselves.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// How a child process ended after [`terminate_gracefully`].
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited within the grace period.
    Graceful(std::process::ExitStatus),
    /// The grace period elapsed and the process was killed.
    Killed(std::process::ExitStatus),
}

#[cfg(feature = "tokio")]
impl Termination {
    pub fn status(&self) -> std::process::ExitStatus {
        match self {
            Self::Graceful(status) | Self::Killed(status) => *status,
        }
    }
}

/// Ask a child process to exit.
///
/// Sends `SIGTERM` on unix. Other targets have no polite equivalent for an
/// arbitrary console tool, so the process is killed outright.
#[cfg(feature = "tokio")]
pub fn request_terminate(child: &mut tokio::process::Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // `id()` is `None` once the child has been reaped.
        let Some(pid) = child.id() else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Request termination, wait up to `grace`, then escalate to a hard kill.
#[cfg(feature = "tokio")]
pub async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace: std::time::Duration,
) -> std::io::Result<Termination> {
    request_terminate(child)?;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(Termination::Graceful(status?)),
        Err(_) => {
            child.kill().await?;
            Ok(Termination::Killed(child.wait().await?))
        }
    }
}
