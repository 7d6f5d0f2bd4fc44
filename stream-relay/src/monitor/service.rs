//! Per-stream metrics polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{ForcedMetrics, StreamMetricsSeries, calculate_bitrates};
use crate::config::{MonitorConfig, SourceConfig};
use crate::fanout::{StreamEnded, StreamSnapshot, StreamUpdate, SubscriberHub};
use crate::notification::{NotificationService, RelayNotification};
use crate::probe::{InspectDepth, ProbeReport, StreamInspector};
use crate::store::RelayStore;

/// Polls technical metadata of every publishing stream.
///
/// Each active stream key owns one polling loop tagged with a generation
/// number. Stopping a key removes it from the active set; its loop notices
/// at the next tick and exits, and a later restart gets a fresh generation
/// so a stale loop can never write into the new series.
pub struct StreamMonitor {
    store: Arc<RelayStore>,
    inspector: Arc<dyn StreamInspector>,
    source: SourceConfig,
    config: MonitorConfig,
    hub: SubscriberHub,
    notifier: NotificationService,
    active: DashMap<String, u64>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl StreamMonitor {
    pub fn new(
        store: Arc<RelayStore>,
        inspector: Arc<dyn StreamInspector>,
        source: SourceConfig,
        config: MonitorConfig,
        hub: SubscriberHub,
        notifier: NotificationService,
    ) -> Self {
        Self {
            store,
            inspector,
            source,
            config,
            hub,
            notifier,
            active: DashMap::new(),
            next_generation: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Begin polling `stream_key` unless it is already polled.
    ///
    /// Non-empty `forced` metrics are stored either way, so callers can
    /// refresh overrides by calling this repeatedly.
    pub fn start_stream_monitoring(self: &Arc<Self>, stream_key: &str, forced: Option<ForcedMetrics>) {
        if let Some(forced) = forced.filter(|f| !f.is_empty()) {
            self.store.forced.insert(stream_key.to_string(), forced);
        }

        if self.shutdown.is_cancelled() {
            return;
        }

        let generation = match self.active.entry(stream_key.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                entry.insert(generation);
                generation
            }
        };

        info!(stream_key, "Started stream monitoring");
        let monitor = Arc::clone(self);
        let stream_key = stream_key.to_string();
        tokio::spawn(async move { monitor.poll_loop(stream_key, generation).await });
    }

    /// Stop polling, drop the series and overrides, and announce the end.
    pub fn stop_stream_monitoring(&self, stream_key: &str) {
        let was_active = self.active.remove(stream_key).is_some();
        let series = self.store.metrics.remove(stream_key).map(|(_, s)| s);
        self.store.forced.remove(stream_key);

        if let Some(series) = series {
            self.notifier
                .notify(RelayNotification::StreamEnded(series.summary(stream_key)));
        }

        self.hub
            .publish_stream(StreamUpdate::Ended(StreamEnded::new(stream_key)));

        if was_active {
            info!(stream_key, "Stopped stream monitoring");
        }
    }

    pub fn is_monitoring(&self, stream_key: &str) -> bool {
        self.active.contains_key(stream_key)
    }

    pub fn active_streams(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Current series of one stream.
    pub fn snapshot(&self, stream_key: &str) -> Option<StreamMetricsSeries> {
        self.store.metrics.get(stream_key).map(|s| s.clone())
    }

    /// Current series of every stream.
    pub fn snapshots(&self) -> HashMap<String, StreamMetricsSeries> {
        self.store
            .metrics
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn forced_metrics(&self, stream_key: &str) -> Option<ForcedMetrics> {
        self.store.forced.get(stream_key).map(|f| *f)
    }

    /// Stop every polling loop without announcing stream ends.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.active.clear();
    }

    fn is_current(&self, stream_key: &str, generation: u64) -> bool {
        self.active
            .get(stream_key)
            .is_some_and(|g| *g == generation)
    }

    async fn poll_loop(self: Arc<Self>, stream_key: String, generation: u64) {
        let locator = self.source.locator(&stream_key);
        let tick = self.config.tick();

        while self.is_current(&stream_key, generation) {
            match self.inspector.inspect(&locator, InspectDepth::Full).await {
                Ok(report) => self.record_sample(&stream_key, generation, &report),
                Err(e) => {
                    warn!(stream_key = %stream_key, error = %e, "Metrics probe failed");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }
        }
        debug!(stream_key = %stream_key, generation, "Monitoring loop exited");
    }

    fn record_sample(&self, stream_key: &str, generation: u64, report: &ProbeReport) {
        // Holding the active entry keeps a concurrent stop from interleaving
        // between the membership check and the write.
        let Some(current) = self.active.get(stream_key) else {
            return;
        };
        if *current != generation {
            return;
        }

        let forced = self.store.forced.get(stream_key).map(|f| *f);
        let derived = calculate_bitrates(report, forced.as_ref(), self.config.default_audio_bitrate);
        let timestamp = chrono::Utc::now().timestamp_millis();

        let series = {
            let mut entry = self
                .store
                .metrics
                .entry(stream_key.to_string())
                .or_insert_with(|| StreamMetricsSeries::new(self.config.window));
            entry.push(derived, timestamp);
            entry.clone()
        };
        drop(current);

        self.hub.publish_stream(StreamUpdate::Snapshot(StreamSnapshot {
            stream_key: stream_key.to_string(),
            series,
        }));
    }
}
