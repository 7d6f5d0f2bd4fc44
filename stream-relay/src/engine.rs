//! Engine facade.
//!
//! [`RelayEngine`] wires the store, probe, forwarding sessions, stream
//! monitor, ingest bridge, notifications and fan-out together and exposes
//! the operations an outer API layer calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::EngineConfig;
use crate::fanout::{StreamUpdate, SubscriberHub, SystemUpdate};
use crate::forwarder::{Destination, ForwardingMode, ForwardingService, SessionStatus};
use crate::ingest::{IngestBridge, IngestStatus};
use crate::media_server::PublishHooks;
use crate::monitor::{ForcedMetrics, StreamMetricsSeries, StreamMonitor};
use crate::notification::{NotificationChannel, NotificationService};
use crate::probe::{FfprobeInspector, LivenessProbe, StreamInspector};
use crate::store::RelayStore;
use crate::system::spawn_host_sampler;
use crate::worker::{FfmpegLauncher, WorkerLauncher};

/// Pluggable collaborators.
pub struct EngineParts {
    pub launcher: Arc<dyn WorkerLauncher>,
    pub inspector: Arc<dyn StreamInspector>,
    /// Channels added on top of those built from the notification settings.
    pub channels: Vec<Arc<dyn NotificationChannel>>,
}

impl EngineParts {
    /// ffmpeg workers and the ffprobe inspector.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            launcher: Arc::new(FfmpegLauncher::new()),
            inspector: Arc::new(FfprobeInspector::from_config(&config.tools, &config.probe)),
            channels: Vec::new(),
        }
    }
}

pub struct RelayEngine {
    config: EngineConfig,
    store: Arc<RelayStore>,
    hub: SubscriberHub,
    forwarding: ForwardingService,
    monitor: Arc<StreamMonitor>,
    ingest: Arc<IngestBridge>,
    hooks: PublishHooks,
    shutdown: CancellationToken,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl RelayEngine {
    /// Build an engine with real ffmpeg/ffprobe collaborators.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let parts = EngineParts::from_config(&config);
        Self::with_parts(config, parts)
    }

    pub fn with_parts(config: EngineConfig, parts: EngineParts) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(RelayStore::new());
        let hub = SubscriberHub::new();

        let mut notifier = NotificationService::from_config(&config.notification, hub.clone());
        for channel in parts.channels {
            notifier = notifier.with_channel(channel);
        }

        let probe = LivenessProbe::from_config(Arc::clone(&parts.inspector), &config.probe);

        let monitor = Arc::new(StreamMonitor::new(
            Arc::clone(&store),
            Arc::clone(&parts.inspector),
            config.source.clone(),
            config.monitor.clone(),
            hub.clone(),
            notifier.clone(),
        ));

        let forwarding = ForwardingService::new(
            Arc::clone(&store),
            Arc::clone(&parts.launcher),
            probe,
            notifier.clone(),
            config.tools.clone(),
            config.source.clone(),
            config.forwarding.clone(),
        );

        let ingest = Arc::new(IngestBridge::new(
            parts.launcher,
            Arc::clone(&monitor),
            notifier,
            hub.clone(),
            config.tools.clone(),
            config.source.clone(),
            config.ingest.clone(),
        ));

        let hooks = PublishHooks::new(Arc::clone(&monitor));

        Ok(Self {
            config,
            store,
            hub,
            forwarding,
            monitor,
            ingest,
            hooks,
            shutdown: CancellationToken::new(),
            sampler: Mutex::new(None),
        })
    }

    /// Start background work: the host sampler and, when configured, the ingest bridge.
    pub fn start(&self) {
        if self.config.system.enabled {
            let mut sampler = self.sampler.lock();
            if sampler.is_none() {
                *sampler = Some(spawn_host_sampler(
                    self.hub.clone(),
                    std::time::Duration::from_millis(self.config.system.sample_interval_ms),
                    self.shutdown.child_token(),
                ));
            }
        }
        if self.config.ingest.enabled {
            self.ingest.set_enabled(true);
        }
        info!("Relay engine started");
    }

    /// Stop every session, monitor loop, the ingest bridge and the host sampler.
    pub async fn shutdown(&self) {
        info!("Shutting down relay engine");
        self.shutdown.cancel();
        self.forwarding.shutdown().await;
        self.ingest.shutdown();
        self.monitor.shutdown();

        let sampler = self.sampler.lock().take();
        if let Some(sampler) = sampler {
            let _ = sampler.await;
        }
        info!("Relay engine stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RelayStore> {
        &self.store
    }

    pub fn hooks(&self) -> &PublishHooks {
        &self.hooks
    }

    pub fn subscribe_streams(&self) -> broadcast::Receiver<StreamUpdate> {
        self.hub.subscribe_streams()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<SystemUpdate> {
        self.hub.subscribe_system()
    }

    pub async fn start_forwarding(
        &self,
        stream_key: &str,
        destination: Destination,
    ) -> Result<ForwardingMode> {
        self.forwarding.start_forwarding(stream_key, destination).await
    }

    pub async fn stop_forwarding(&self, stream_key: &str, destination_id: u32) -> bool {
        self.forwarding.stop_forwarding(stream_key, destination_id).await
    }

    pub async fn reload_stream(
        &self,
        stream_key: &str,
        destination: Destination,
    ) -> Result<ForwardingMode> {
        self.forwarding.reload_stream(stream_key, destination).await
    }

    pub async fn stop_all_forwarding(&self, stream_key: &str) -> Vec<u32> {
        self.forwarding.stop_all_forwarding(stream_key).await
    }

    pub fn forwarding_status(&self, stream_key: &str, destination_id: u32) -> SessionStatus {
        self.forwarding.status(stream_key, destination_id)
    }

    pub fn start_stream_monitoring(&self, stream_key: &str, forced: Option<ForcedMetrics>) {
        self.monitor.start_stream_monitoring(stream_key, forced);
    }

    pub fn stop_stream_monitoring(&self, stream_key: &str) {
        self.monitor.stop_stream_monitoring(stream_key);
    }

    pub fn metrics(&self, stream_key: &str) -> Option<StreamMetricsSeries> {
        self.monitor.snapshot(stream_key)
    }

    pub fn all_metrics(&self) -> HashMap<String, StreamMetricsSeries> {
        self.monitor.snapshots()
    }

    pub fn set_ingest_enabled(&self, enabled: bool) {
        self.ingest.set_enabled(enabled);
    }

    /// Rejects ports outside 1024..=65535 with a validation error.
    pub fn set_ingest_port(&self, port: u32) -> Result<()> {
        self.ingest.set_port(port)
    }

    pub fn ingest_status(&self) -> IngestStatus {
        self.ingest.get_status()
    }
}
