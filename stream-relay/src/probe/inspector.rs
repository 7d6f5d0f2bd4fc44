//! Out-of-process stream inspector.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::tokio_command;
use tracing::trace;

use super::report::ProbeReport;
use crate::config::{ProbeConfig, ToolsConfig};
use crate::{Error, Result};

/// How much the inspector should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectDepth {
    /// Stream-type entries only; cheap.
    StreamTypes,
    /// Codecs, dimensions, frame rates and bit rates of every stream plus the container.
    Full,
}

/// Describes the elementary streams found at a source locator.
#[async_trait]
pub trait StreamInspector: Send + Sync + 'static {
    async fn inspect(&self, locator: &str, depth: InspectDepth) -> Result<ProbeReport>;
}

/// ffprobe-backed inspector.
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    binary_path: String,
    timeout: Duration,
    probe_size: u64,
}

impl FfprobeInspector {
    pub fn new(binary_path: impl Into<String>, timeout: Duration, probe_size: u64) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
            probe_size,
        }
    }

    pub fn from_config(tools: &ToolsConfig, probe: &ProbeConfig) -> Self {
        Self::new(tools.ffprobe_path.clone(), probe.timeout(), probe.probe_size)
    }

    /// Build ffprobe command arguments.
    fn build_args(&self, locator: &str, depth: InspectDepth) -> Vec<String> {
        let mut args = vec!["-v".to_string(), "error".to_string()];

        match depth {
            InspectDepth::StreamTypes => {
                args.extend(["-show_entries".to_string(), "stream=codec_type".to_string()]);
            }
            InspectDepth::Full => {
                args.extend([
                    "-probesize".to_string(),
                    self.probe_size.to_string(),
                    "-show_streams".to_string(),
                    "-show_format".to_string(),
                ]);
            }
        }

        args.extend(["-of".to_string(), "json".to_string(), locator.to_string()]);
        args
    }
}

#[async_trait]
impl StreamInspector for FfprobeInspector {
    async fn inspect(&self, locator: &str, depth: InspectDepth) -> Result<ProbeReport> {
        let args = self.build_args(locator, depth);
        trace!(locator, ?depth, "Running ffprobe");

        let output = tokio_command(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        // The child is killed when the timed-out future is dropped.
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| Error::probe(format!("ffprobe timed out after {:?}", self.timeout)))?
            .map_err(|e| Error::probe(format!("{}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::probe(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        ProbeReport::from_json(&stdout)
            .map_err(|e| Error::probe(format!("malformed ffprobe output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspector() -> FfprobeInspector {
        FfprobeInspector::new("ffprobe", Duration::from_secs(5), 5_000_000)
    }

    #[test]
    fn test_stream_type_args() {
        let args = inspector().build_args("rtmp://127.0.0.1:1935/live/cam1", InspectDepth::StreamTypes);
        assert_eq!(
            args,
            vec![
                "-v",
                "error",
                "-show_entries",
                "stream=codec_type",
                "-of",
                "json",
                "rtmp://127.0.0.1:1935/live/cam1"
            ]
        );
    }

    #[test]
    fn test_full_args() {
        let args = inspector().build_args("rtmp://x/live/cam1", InspectDepth::Full);
        assert!(args.contains(&"-show_streams".to_string()));
        assert!(args.contains(&"-show_format".to_string()));
        let pos = args.iter().position(|a| a == "-probesize").unwrap();
        assert_eq!(args[pos + 1], "5000000");
    }

    #[tokio::test]
    async fn test_missing_binary_is_probe_failure() {
        let inspector =
            FfprobeInspector::new("/nonexistent/ffprobe", Duration::from_secs(1), 1_000_000);
        let err = inspector
            .inspect("rtmp://127.0.0.1/live/none", InspectDepth::StreamTypes)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProbeFailure(_)));
    }
}
