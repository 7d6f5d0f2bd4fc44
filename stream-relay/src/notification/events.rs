//! Notification events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::monitor::StreamSummary;

/// Notification priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Normal => write!(f, "Normal"),
            Self::High => write!(f, "High"),
        }
    }
}

/// Everything the engine tells humans about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RelayNotification {
    ForwardingStarted {
        destination_id: u32,
        target_url: String,
    },
    ForwardingStopped {
        destination_id: u32,
    },
    SwitchedToMain {
        stream_key: String,
        destination_id: u32,
    },
    SwitchedToFallback {
        stream_key: String,
        destination_id: u32,
    },
    ForwardingError {
        destination_id: u32,
        target_url: String,
        error: String,
    },
    StreamEnded(StreamSummary),
    IngestStarted {
        port: u16,
    },
    IngestActive {
        stream_key: String,
    },
    IngestStopped,
    IngestFailed {
        error: String,
    },
    IngestExited {
        code: Option<i32>,
    },
}

/// Destinations are numbered from one for humans.
fn destination_label(id: u32) -> String {
    format!("destination {}", u64::from(id) + 1)
}

fn format_bitrate(bps: u64) -> String {
    if bps >= 1_000_000 {
        format!("{:.2} Mbps", bps as f64 / 1_000_000.0)
    } else {
        format!("{} kbps", bps / 1000)
    }
}

fn format_duration(ticks: u64) -> String {
    let (h, m, s) = (ticks / 3600, (ticks % 3600) / 60, ticks % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

impl RelayNotification {
    /// Stable machine-readable name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ForwardingStarted { .. } => "forwarding_started",
            Self::ForwardingStopped { .. } => "forwarding_stopped",
            Self::SwitchedToMain { .. } => "switched_to_main",
            Self::SwitchedToFallback { .. } => "switched_to_fallback",
            Self::ForwardingError { .. } => "forwarding_error",
            Self::StreamEnded(_) => "stream_ended",
            Self::IngestStarted { .. } => "ingest_started",
            Self::IngestActive { .. } => "ingest_active",
            Self::IngestStopped => "ingest_stopped",
            Self::IngestFailed { .. } => "ingest_failed",
            Self::IngestExited { .. } => "ingest_exited",
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::ForwardingError { .. }
            | Self::SwitchedToFallback { .. }
            | Self::IngestFailed { .. }
            | Self::IngestExited { .. } => NotificationPriority::High,
            Self::ForwardingStopped { .. } | Self::IngestStopped => NotificationPriority::Low,
            _ => NotificationPriority::Normal,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::ForwardingStarted { .. } => "Forwarding started",
            Self::ForwardingStopped { .. } => "Forwarding stopped",
            Self::SwitchedToMain { .. } => "Main stream",
            Self::SwitchedToFallback { .. } => "Fallback stream",
            Self::ForwardingError { .. } => "Forwarding error",
            Self::StreamEnded(_) => "Stream ended",
            Self::IngestStarted { .. } | Self::IngestActive { .. } => "SRT ingest",
            Self::IngestStopped => "SRT ingest stopped",
            Self::IngestFailed { .. } | Self::IngestExited { .. } => "SRT ingest error",
        }
    }

    /// Human-readable text.
    pub fn description(&self) -> String {
        match self {
            Self::ForwardingStarted {
                destination_id,
                target_url,
            } => format!(
                "Started forwarding to {} ({})",
                destination_label(*destination_id),
                target_url
            ),
            Self::ForwardingStopped { destination_id } => {
                format!("Stopped forwarding to {}", destination_label(*destination_id))
            }
            Self::SwitchedToMain { destination_id, .. } => format!(
                "Switched to main stream for {}",
                destination_label(*destination_id)
            ),
            Self::SwitchedToFallback { destination_id, .. } => format!(
                "Switched to fallback stream for {}",
                destination_label(*destination_id)
            ),
            Self::ForwardingError {
                destination_id,
                target_url,
                error,
            } => format!(
                "Forwarding to {} ({}) failed: {}",
                destination_label(*destination_id),
                target_url,
                error
            ),
            Self::StreamEnded(summary) => format!(
                "Stream {} ended after {}\nResolution: {}\nCodecs: {} / {}\nLast bitrate: {} video + {} audio = {}",
                summary.stream_key,
                format_duration(summary.duration),
                if summary.resolution.is_empty() { "unknown" } else { &summary.resolution },
                if summary.video_codec.is_empty() { "none" } else { &summary.video_codec },
                if summary.audio_codec.is_empty() { "none" } else { &summary.audio_codec },
                format_bitrate(summary.video_bitrate),
                format_bitrate(summary.audio_bitrate),
                format_bitrate(summary.total_bitrate),
            ),
            Self::IngestStarted { port } => {
                format!("SRT to RTMP conversion started on port {}", port)
            }
            Self::IngestActive { stream_key } => format!(
                "SRT to RTMP conversion active and monitored as {}",
                stream_key
            ),
            Self::IngestStopped => "SRT to RTMP conversion stopped".to_string(),
            Self::IngestFailed { error } => {
                format!("Failed to start SRT to RTMP conversion: {}", error)
            }
            Self::IngestExited { code } => match code {
                Some(code) => format!(
                    "SRT to RTMP conversion stopped unexpectedly (code: {})",
                    code
                ),
                None => "SRT to RTMP conversion stopped unexpectedly".to_string(),
            },
        }
    }
}

impl fmt::Display for RelayNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
