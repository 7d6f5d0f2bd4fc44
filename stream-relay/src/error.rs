//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream inspector could not be invoked or returned unusable output.
    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    /// A worker process could not be started.
    #[error("Failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// A worker process died unexpectedly.
    #[error("Worker failed: {0}")]
    WorkerRuntime(String),

    /// Caller-supplied configuration was rejected.
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::ProbeFailure(msg.into())
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::WorkerSpawn(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::WorkerRuntime(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Whether the error must be surfaced to the caller instead of being
    /// recovered through the fallback path.
    pub fn is_caller_facing(&self) -> bool {
        matches!(self, Self::ConfigValidation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_errors_are_caller_facing() {
        assert!(Error::validation("port out of range").is_caller_facing());
        assert!(!Error::probe("timeout").is_caller_facing());
        assert!(!Error::spawn("not found").is_caller_facing());
        assert!(!Error::runtime("exit 1").is_caller_facing());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::spawn("ffmpeg: No such file or directory");
        assert_eq!(
            err.to_string(),
            "Failed to spawn worker: ffmpeg: No such file or directory"
        );
    }
}
