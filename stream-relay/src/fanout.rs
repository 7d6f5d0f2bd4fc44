//! Real-time subscriber fan-out.
//!
//! Two broadcast channels: `streams` carries per-stream metric snapshots and
//! end notices, `system` carries notifications, host metrics and ingest
//! status. Delivery is best-effort to whoever is subscribed at publish time;
//! nothing is queued for subscribers that join later, and a lagging
//! subscriber loses the oldest updates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::ingest::IngestStatus;
use crate::monitor::StreamMetricsSeries;
use crate::system::HostMetrics;

/// Default per-channel buffer.
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;

/// Update on the per-stream channel.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamUpdate {
    Snapshot(StreamSnapshot),
    Ended(StreamEnded),
}

impl StreamUpdate {
    pub fn stream_key(&self) -> &str {
        match self {
            Self::Snapshot(s) => &s.stream_key,
            Self::Ended(e) => &e.stream_key,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Full current series of a stream, merged with its key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub stream_key: String,
    #[serde(flatten)]
    pub series: StreamMetricsSeries,
}

/// Terminal notice for a stream that stopped publishing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnded {
    pub stream_key: String,
    pub is_active: bool,
}

impl StreamEnded {
    pub fn new(stream_key: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            is_active: false,
        }
    }
}

/// Update on the system-wide channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SystemUpdate {
    Notification(NotificationRecord),
    Host(HostMetrics),
    Ingest(IngestStatus),
}

impl SystemUpdate {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A rendered notification as seen by dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub event_type: &'static str,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast hub shared by every publisher.
#[derive(Debug, Clone)]
pub struct SubscriberHub {
    streams: broadcast::Sender<StreamUpdate>,
    system: broadcast::Sender<SystemUpdate>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FANOUT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (streams, _) = broadcast::channel(capacity);
        let (system, _) = broadcast::channel(capacity);
        Self { streams, system }
    }

    pub fn subscribe_streams(&self) -> broadcast::Receiver<StreamUpdate> {
        self.streams.subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemUpdate> {
        self.system.subscribe()
    }

    /// Publish on the per-stream channel. Returns how many subscribers received it.
    pub fn publish_stream(&self, update: StreamUpdate) -> usize {
        // No subscribers is not an error here.
        self.streams.send(update).unwrap_or(0)
    }

    /// Publish on the system-wide channel. Returns how many subscribers received it.
    pub fn publish_system(&self, update: SystemUpdate) -> usize {
        self.system.send(update).unwrap_or(0)
    }

    pub fn stream_subscribers(&self) -> usize {
        self.streams.receiver_count()
    }

    pub fn system_subscribers(&self) -> usize {
        self.system.receiver_count()
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}
