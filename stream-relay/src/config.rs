//! Engine configuration.
//!
//! Every section has sensible defaults so an empty JSON object (or no
//! config file at all) yields a working engine. Values can be layered from
//! a JSON file named by `RELAY_CONFIG` and individual `RELAY_*` variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Lowest port the ingest listener may bind to.
pub const MIN_INGEST_PORT: u16 = 1024;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tools: ToolsConfig,
    pub source: SourceConfig,
    pub probe: ProbeConfig,
    pub forwarding: ForwardingConfig,
    pub monitor: MonitorConfig,
    pub ingest: IngestConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingSettings,
    pub system: SystemConfig,
}

/// External binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

/// Where the ingest server exposes published streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base locator; a stream key is appended as the final path segment.
    pub base_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "rtmp://127.0.0.1:1935/live".to_string(),
        }
    }
}

impl SourceConfig {
    /// Locator of the live source for a stream key.
    pub fn locator(&self, stream_key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), stream_key)
    }
}

/// Stream inspector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Liveness attempts before giving up.
    pub retries: u32,
    /// Delay between liveness attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Upper bound on a single inspector invocation in milliseconds.
    pub timeout_ms: u64,
    /// Bytes the inspector may read when resolving full metadata.
    pub probe_size: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 1000,
            timeout_ms: 10_000,
            probe_size: 5_000_000,
        }
    }
}

impl ProbeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-destination forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Liveness re-check interval while relaying, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay before respawning a placeholder worker that errored, in milliseconds.
    pub fallback_retry_delay_ms: u64,
    /// Placeholder image looped while the source is down.
    pub fallback_image: PathBuf,
    /// Placeholder encoding profile.
    pub fallback_video_bitrate: String,
    pub fallback_audio_bitrate: String,
    pub fallback_frame_rate: u32,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            fallback_retry_delay_ms: 5000,
            fallback_image: PathBuf::from("assets/fallback.png"),
            fallback_video_bitrate: "2500k".to_string(),
            fallback_audio_bitrate: "128k".to_string(),
            fallback_frame_rate: 30,
        }
    }
}

impl ForwardingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_retry_delay_ms)
    }
}

/// Metrics polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Polling tick in milliseconds.
    pub tick_ms: u64,
    /// Number of samples kept in the rolling window.
    pub window: usize,
    /// Audio bitrate assumed when deriving video bitrate from the container total.
    pub default_audio_bitrate: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            window: 30,
            default_audio_bitrate: 128_000,
        }
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Alternate-transport ingest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    pub port: u16,
    /// Stream key the bridged stream is published under.
    pub stream_key: String,
    /// Minimum spacing between forced-metrics pushes, in milliseconds.
    pub metrics_push_interval_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 5000,
            stream_key: "srt_key".to_string(),
            metrics_push_interval_ms: 1000,
        }
    }
}

impl IngestConfig {
    pub fn metrics_push_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_push_interval_ms)
    }
}

/// Validate an ingest listener port.
pub fn validate_ingest_port(port: u32) -> Result<u16> {
    if port < MIN_INGEST_PORT as u32 || port > u16::MAX as u32 {
        return Err(Error::validation(format!(
            "Port must be between {} and {}",
            MIN_INGEST_PORT,
            u16::MAX
        )));
    }
    Ok(port as u16)
}

/// Outbound notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Directory for daily-rolling log files; console only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

/// Host metrics sampler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub enabled: bool,
    pub sample_interval_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 1500,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `RELAY_CONFIG` (if set) and `RELAY_*` overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("RELAY_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `RELAY_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RELAY_FFMPEG_PATH") {
            self.tools.ffmpeg_path = v;
        }
        if let Some(v) = lookup("RELAY_FFPROBE_PATH") {
            self.tools.ffprobe_path = v;
        }
        if let Some(v) = lookup("RELAY_SOURCE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = lookup("RELAY_FALLBACK_IMAGE") {
            self.forwarding.fallback_image = PathBuf::from(v);
        }
        if let Some(v) = lookup("RELAY_INGEST_ENABLED") {
            self.ingest.enabled = parse_bool("RELAY_INGEST_ENABLED", &v)?;
        }
        if let Some(v) = lookup("RELAY_INGEST_PORT") {
            let port: u32 = v
                .trim()
                .parse()
                .map_err(|_| Error::validation(format!("RELAY_INGEST_PORT: '{}' is not a number", v)))?;
            self.ingest.port = validate_ingest_port(port)?;
        }
        if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
            self.notification.telegram_bot_token = Some(v);
        }
        if let Some(v) = lookup("TELEGRAM_CHAT_ID") {
            self.notification.telegram_chat_id = Some(v);
        }
        if let Some(v) = lookup("RELAY_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_ingest_port(self.ingest.port as u32)?;

        let intervals = [
            ("forwarding.poll_interval_ms", self.forwarding.poll_interval_ms),
            ("monitor.tick_ms", self.monitor.tick_ms),
            ("system.sample_interval_ms", self.system.sample_interval_ms),
            ("probe.timeout_ms", self.probe.timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::validation(format!("{} must be greater than 0", name)));
            }
        }

        if self.probe.retries == 0 {
            return Err(Error::validation("probe.retries must be at least 1"));
        }
        if self.monitor.window == 0 {
            return Err(Error::validation("monitor.window must be at least 1"));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::validation(format!("{}: '{}' is not a boolean", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.probe.retries, 3);
        assert_eq!(config.probe.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.forwarding.poll_interval(), Duration::from_millis(5000));
        assert_eq!(config.forwarding.fallback_retry_delay(), Duration::from_millis(5000));
        assert_eq!(config.monitor.window, 30);
        assert_eq!(config.monitor.default_audio_bitrate, 128_000);
        assert_eq!(config.ingest.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.ingest.stream_key, "srt_key");
        assert_eq!(config.tools.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"ingest": {"port": 6000}, "monitor": {"window": 10}}"#)
                .unwrap();
        assert_eq!(config.ingest.port, 6000);
        assert_eq!(config.ingest.stream_key, "srt_key");
        assert_eq!(config.monitor.window, 10);
        assert_eq!(config.monitor.tick_ms, 1000);
    }

    #[test]
    fn source_locator_joins_with_single_slash() {
        let source = SourceConfig {
            base_url: "rtmp://localhost/live/".to_string(),
        };
        assert_eq!(source.locator("cam1"), "rtmp://localhost/live/cam1");
        assert_eq!(
            SourceConfig::default().locator("cam1"),
            "rtmp://127.0.0.1:1935/live/cam1"
        );
    }

    #[test]
    fn port_validation_bounds() {
        assert!(validate_ingest_port(1023).is_err());
        assert_eq!(validate_ingest_port(1024).unwrap(), 1024);
        assert_eq!(validate_ingest_port(65535).unwrap(), 65535);
        assert!(validate_ingest_port(65536).is_err());
        assert!(validate_ingest_port(0).unwrap_err().is_caller_facing());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("RELAY_FFMPEG_PATH", "/opt/ffmpeg"),
            ("RELAY_INGEST_ENABLED", "true"),
            ("RELAY_INGEST_PORT", "7000"),
            ("TELEGRAM_BOT_TOKEN", "token"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tools.ffmpeg_path, "/opt/ffmpeg");
        assert!(config.ingest.enabled);
        assert_eq!(config.ingest.port, 7000);
        assert_eq!(config.notification.telegram_bot_token.as_deref(), Some("token"));
    }

    #[test]
    fn env_rejects_bad_port() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(|key| (key == "RELAY_INGEST_PORT").then(|| "80".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = EngineConfig::default();
        config.monitor.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"source": {"base_url": "rtmp://media/live"}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.source.locator("a"), "rtmp://media/live/a");
    }
}
