//! External worker processes.
//!
//! A worker is an ffmpeg child process. Launching one yields a
//! [`WorkerHandle`] (used only to request termination) and a channel of
//! [`WorkerEvent`]s describing its stderr output and how it ended. The
//! supervising side consumes that channel from a single task, so no two
//! lifecycle events of one worker are ever handled concurrently.

mod args;
mod parser;

pub use args::{destination_locator, fallback_args, ingest_args, relay_args};
pub use parser::{
    FatalMarker, detect_fatal_marker, is_input_connected, parse_audio_bitrate,
    parse_bitrate_announcement, parse_frame_count,
};

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use process_utils::{ExitInfo, tokio_command};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Capacity of a worker's event channel.
pub const WORKER_EVENT_CAPACITY: usize = 256;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// What a worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Copying the live source to a destination.
    Relay,
    /// Streaming the placeholder signal to a destination.
    Fallback,
    /// Receiving an alternate-transport stream into the source namespace.
    Ingest,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Fallback => "fallback",
            Self::Ingest => "ingest",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub role: WorkerRole,
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerSpec {
    pub fn new(role: WorkerRole, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args,
        }
    }
}

/// Lifecycle events of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One line of diagnostic output.
    Output(String),
    /// The process ended. `signal_was_ours` is set when the registry's own
    /// kill request (or its kill signal) ended it.
    Exited {
        code: Option<i32>,
        signal_was_ours: bool,
    },
    /// The process could not be supervised any further.
    ErrorOccurred(String),
}

/// Termination handle of a running worker.
///
/// Killing is a synchronous request: the supervising task delivers the
/// kill signal, and the request itself is the cancellation point.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: u64,
    role: WorkerRole,
    pid: Option<u32>,
    kill_token: CancellationToken,
}

impl WorkerHandle {
    pub fn new(role: WorkerRole, pid: Option<u32>, kill_token: CancellationToken) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            role,
            pid,
            kill_token,
        }
    }

    /// Process-unique identifier of this worker instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. Idempotent; a worker that already exited is unaffected.
    pub fn kill(&self) {
        self.kill_token.cancel();
    }

    pub fn is_kill_requested(&self) -> bool {
        self.kill_token.is_cancelled()
    }
}

/// A freshly launched worker.
#[derive(Debug)]
pub struct SpawnedWorker {
    pub handle: WorkerHandle,
    pub events: mpsc::Receiver<WorkerEvent>,
}

/// Starts worker processes.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Launch a worker. Fails only when the process cannot be started at all.
    fn launch(&self, spec: &WorkerSpec) -> Result<SpawnedWorker>;
}

/// Launches real ffmpeg processes.
#[derive(Debug, Default, Clone)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerLauncher for FfmpegLauncher {
    fn launch(&self, spec: &WorkerSpec) -> Result<SpawnedWorker> {
        debug!(role = %spec.role, program = %spec.program, args = ?spec.args, "Launching worker");

        let mut child = tokio_command(&spec.program)
            .args(&spec.args)
            .env("LC_ALL", "C") // Force consistent output
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::spawn(format!("{}: {}", spec.program, e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn("Failed to capture worker stderr"))?;

        let (tx, rx) = mpsc::channel(WORKER_EVENT_CAPACITY);
        let kill_token = CancellationToken::new();
        let handle = WorkerHandle::new(spec.role, child.id(), kill_token.clone());

        tokio::spawn(forward_output(stderr, tx.clone(), spec.role));
        tokio::spawn(supervise(child, kill_token, tx, spec.role));

        Ok(SpawnedWorker { handle, events: rx })
    }
}

/// Wait for the child to end (or for a kill request) and report how it ended.
async fn supervise(
    mut child: Child,
    kill_token: CancellationToken,
    tx: mpsc::Sender<WorkerEvent>,
    role: WorkerRole,
) {
    let event = tokio::select! {
        _ = kill_token.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!(%role, error = %e, "Worker already gone when kill was requested");
            }
            let code = child.wait().await.ok().and_then(|s| s.code());
            WorkerEvent::Exited { code, signal_was_ours: true }
        }
        status = child.wait() => {
            match status {
                Ok(status) => {
                    let info = ExitInfo::from(status);
                    if !info.success() {
                        warn!(%role, status = %info, "Worker exited");
                    }
                    WorkerEvent::Exited {
                        code: info.code,
                        signal_was_ours: info.killed_by_kill_signal() || kill_token.is_cancelled(),
                    }
                }
                Err(e) => {
                    error!(%role, error = %e, "Error waiting for worker");
                    WorkerEvent::ErrorOccurred(e.to_string())
                }
            }
        }
    };

    let _ = tx.send(event).await;
}

/// Forward stderr as line events. FFmpeg terminates progress lines with
/// `\r`, so both `\r` and `\n` end a line.
async fn forward_output<R>(mut reader: R, tx: mpsc::Sender<WorkerEvent>, role: WorkerRole)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%role, error = %e, "Error reading worker output");
                break;
            }
        };

        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                emit_line(&mut pending, &tx);
            } else {
                pending.push(byte);
            }
        }
    }
    emit_line(&mut pending, &tx);
}

fn emit_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<WorkerEvent>) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    if !line.is_empty() {
        // Progress output is lossy by nature; never stall the pipe on a slow consumer.
        let _ = tx.try_send(WorkerEvent::Output(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_kill_is_idempotent() {
        let handle = WorkerHandle::new(WorkerRole::Relay, Some(42), CancellationToken::new());
        assert!(!handle.is_kill_requested());
        handle.kill();
        handle.kill();
        assert!(handle.is_kill_requested());
        assert_eq!(handle.pid(), Some(42));
    }

    #[test]
    fn handle_ids_are_unique() {
        let a = WorkerHandle::new(WorkerRole::Relay, None, CancellationToken::new());
        let b = WorkerHandle::new(WorkerRole::Fallback, None, CancellationToken::new());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn output_splits_on_carriage_return_and_newline() {
        let input: &[u8] = b"Input #0, flv\nframe=  10 fps=0\rframe=  40 fps=30\r\ntrailing";
        let (tx, mut rx) = mpsc::channel(16);

        forward_output(input, tx, WorkerRole::Ingest).await;

        let mut lines = Vec::new();
        while let Ok(WorkerEvent::Output(line)) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec!["Input #0, flv", "frame=  10 fps=0", "frame=  40 fps=30", "trailing"]
        );
    }

    #[tokio::test]
    async fn launch_missing_binary_is_spawn_error() {
        let launcher = FfmpegLauncher::new();
        let spec = WorkerSpec::new(
            WorkerRole::Relay,
            "/nonexistent/definitely-not-ffmpeg",
            vec!["-version".to_string()],
        );
        let err = launcher.launch(&spec).unwrap_err();
        assert!(matches!(err, Error::WorkerSpawn(_)));
    }
}
