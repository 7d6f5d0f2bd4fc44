//! Small process-related helpers shared across the workspace.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Signal number the process registry uses to terminate workers (`SIGKILL`).
pub const KILL_SIGNAL: i32 = 9;

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
///
/// The child is killed when its handle is dropped, so a supervising task that
/// goes away never leaves an orphaned worker behind.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Whether the process was terminated by [`KILL_SIGNAL`].
    pub fn killed_by_kill_signal(&self) -> bool {
        self.signal == Some(KILL_SIGNAL)
    }

    /// Whether the process exited cleanly with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_signal_detection() {
        let killed = ExitInfo {
            code: None,
            signal: Some(KILL_SIGNAL),
        };
        assert!(killed.killed_by_kill_signal());
        assert!(!killed.success());

        let terminated = ExitInfo {
            code: None,
            signal: Some(15),
        };
        assert!(!terminated.killed_by_kill_signal());
    }

    #[test]
    fn display_prefers_code() {
        let info = ExitInfo {
            code: Some(1),
            signal: None,
        };
        assert_eq!(info.to_string(), "code 1");
        assert_eq!(
            ExitInfo {
                code: None,
                signal: Some(9)
            }
            .to_string(),
            "signal 9"
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_info_from_status() {
        use std::os::unix::process::ExitStatusExt;

        let info = ExitInfo::from(ExitStatus::from_raw(0));
        assert!(info.success());

        // Raw wait status 9 means "terminated by signal 9".
        let info = ExitInfo::from(ExitStatus::from_raw(9));
        assert!(info.killed_by_kill_signal());
    }
}
