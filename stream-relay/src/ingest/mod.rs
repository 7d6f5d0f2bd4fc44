//! Alternate-transport ingest bridge.
//!
//! A single supervised worker listens for an inbound SRT connection and
//! relays it unmodified into the source namespace under a well-known stream
//! key. Until the regular inspector can resolve that stream, metrics come
//! from the worker's own progress output and are pushed to the monitor as
//! forced overrides.

mod fps;

pub use fps::FpsCalculator;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::{IngestConfig, SourceConfig, ToolsConfig, validate_ingest_port};
use crate::fanout::{SubscriberHub, SystemUpdate};
use crate::monitor::{ForcedMetrics, StreamMonitor};
use crate::notification::{NotificationService, RelayNotification};
use crate::worker::{
    WorkerEvent, WorkerHandle, WorkerLauncher, WorkerRole, WorkerSpec, detect_fatal_marker,
    ingest_args, is_input_connected, parse_audio_bitrate, parse_bitrate_announcement,
    parse_frame_count,
};

/// Audio bitrate assumed until the worker announces one.
const DEFAULT_AUDIO_BITRATE: u64 = 128_000;

/// Caller-facing bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatus {
    pub enabled: bool,
    pub port: u16,
    pub is_running: bool,
}

struct BridgeState {
    enabled: bool,
    port: u16,
    worker: Option<WorkerHandle>,
    /// Bumped on every start and stop; event tasks of older workers go quiet.
    generation: u64,
}

/// Metrics accumulated from progress output.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProgressMetrics {
    video_bitrate: u64,
    audio_bitrate: u64,
    fps: f64,
}

impl ProgressMetrics {
    fn as_forced(&self) -> ForcedMetrics {
        ForcedMetrics {
            video_bitrate: Some(self.video_bitrate).filter(|v| *v > 0),
            audio_bitrate: Some(self.audio_bitrate).filter(|v| *v > 0),
            frame_rate: Some(self.fps).filter(|v| *v > 0.0),
        }
    }
}

/// What one progress line means for the bridge.
#[derive(Debug, Default, PartialEq)]
struct LineOutcome {
    /// The inbound connection was just detected.
    connected: bool,
    /// Forced metrics due for a push.
    push: Option<ForcedMetrics>,
}

/// Parses one worker's progress output.
struct ProgressTracker {
    fps: FpsCalculator,
    metrics: ProgressMetrics,
    connected: bool,
    last_push: Option<Instant>,
    push_interval: Duration,
}

impl ProgressTracker {
    fn new(push_interval: Duration) -> Self {
        Self {
            fps: FpsCalculator::with_baseline(0, Instant::now().into_std()),
            metrics: ProgressMetrics {
                video_bitrate: 0,
                audio_bitrate: DEFAULT_AUDIO_BITRATE,
                fps: 0.0,
            },
            connected: false,
            last_push: None,
            push_interval,
        }
    }

    fn observe(&mut self, line: &str, now: Instant) -> LineOutcome {
        let mut outcome = LineOutcome::default();

        if let Some(frames) = parse_frame_count(line) {
            let fps = self.fps.calculate_at(frames, now.into_std());
            if fps > 0.0 {
                self.metrics.fps = fps;
            }
        }
        if let Some(bitrate) = parse_bitrate_announcement(line) {
            self.metrics.video_bitrate = bitrate;
        }
        if let Some(bitrate) = parse_audio_bitrate(line) {
            self.metrics.audio_bitrate = bitrate;
        }

        if !self.connected && is_input_connected(line) {
            self.connected = true;
            self.fps.reset_at(now.into_std());
            outcome.connected = true;
        }

        if self.connected {
            let due = self
                .last_push
                .is_none_or(|last| now.saturating_duration_since(last) >= self.push_interval);
            if due {
                self.last_push = Some(now);
                outcome.push = Some(self.metrics.as_forced());
            }
        }
        outcome
    }
}

/// Supervises the ingest worker.
pub struct IngestBridge {
    launcher: Arc<dyn WorkerLauncher>,
    monitor: Arc<StreamMonitor>,
    notifier: NotificationService,
    hub: SubscriberHub,
    tools: ToolsConfig,
    source: SourceConfig,
    config: IngestConfig,
    state: Mutex<BridgeState>,
}

impl IngestBridge {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        monitor: Arc<StreamMonitor>,
        notifier: NotificationService,
        hub: SubscriberHub,
        tools: ToolsConfig,
        source: SourceConfig,
        config: IngestConfig,
    ) -> Self {
        Self {
            launcher,
            monitor,
            notifier,
            hub,
            tools,
            source,
            state: Mutex::new(BridgeState {
                enabled: false,
                port: config.port,
                worker: None,
                generation: 0,
            }),
            config,
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.config.stream_key
    }

    /// Start or stop the worker.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        {
            let mut state = self.state.lock();
            state.enabled = enabled;
            if enabled {
                self.start_worker(&mut state);
            } else {
                self.stop_worker(&mut state);
            }
        }
        self.publish_status();
    }

    /// Change the listener port; restarts the worker when enabled.
    pub fn set_port(self: &Arc<Self>, port: u32) -> Result<()> {
        let port = validate_ingest_port(port)?;
        {
            let mut state = self.state.lock();
            state.port = port;
            if state.enabled {
                self.start_worker(&mut state);
            }
        }
        self.publish_status();
        Ok(())
    }

    pub fn get_status(&self) -> IngestStatus {
        let state = self.state.lock();
        IngestStatus {
            enabled: state.enabled,
            port: state.port,
            is_running: state.worker.is_some(),
        }
    }

    /// Disable and stop the worker.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.enabled = false;
        self.stop_worker(&mut state);
    }

    fn publish_status(&self) {
        self.hub.publish_system(SystemUpdate::Ingest(self.get_status()));
    }

    fn start_worker(self: &Arc<Self>, state: &mut BridgeState) {
        self.stop_worker(state);
        state.generation += 1;

        let target = self.source.locator(&self.config.stream_key);
        let spec = WorkerSpec::new(
            WorkerRole::Ingest,
            self.tools.ffmpeg_path.clone(),
            ingest_args(state.port, &target),
        );

        match self.launcher.launch(&spec) {
            Ok(spawned) => {
                info!(
                    port = state.port,
                    stream_key = %self.config.stream_key,
                    pid = ?spawned.handle.pid(),
                    "Ingest worker started"
                );
                state.worker = Some(spawned.handle);
                let bridge = Arc::clone(self);
                let generation = state.generation;
                tokio::spawn(async move { bridge.consume_events(generation, spawned.events).await });
                self.notifier
                    .notify(RelayNotification::IngestStarted { port: state.port });
            }
            Err(e) => {
                error!(port = state.port, error = %e, "Failed to start ingest worker");
                self.notifier.notify(RelayNotification::IngestFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    fn stop_worker(&self, state: &mut BridgeState) {
        let Some(handle) = state.worker.take() else {
            return;
        };
        state.generation += 1;
        self.monitor.stop_stream_monitoring(&self.config.stream_key);
        handle.kill();
        info!("Ingest worker stopped");
        self.notifier.notify(RelayNotification::IngestStopped);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    async fn consume_events(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<WorkerEvent>) {
        let mut tracker = ProgressTracker::new(self.config.metrics_push_interval());
        let stream_key = self.config.stream_key.clone();

        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Output(line) => {
                    if let Some(marker) = detect_fatal_marker(&line) {
                        error!(role = "ingest", marker = marker.as_str(), "{}", line);
                    }

                    let outcome = tracker.observe(&line, Instant::now());
                    if !self.is_current(generation) {
                        continue;
                    }
                    if outcome.connected {
                        info!(stream_key = %stream_key, "Ingest input connected");
                        self.monitor.start_stream_monitoring(&stream_key, None);
                        self.notifier.notify(RelayNotification::IngestActive {
                            stream_key: stream_key.clone(),
                        });
                    }
                    if let Some(forced) = outcome.push {
                        self.monitor.start_stream_monitoring(&stream_key, Some(forced));
                    }
                }
                WorkerEvent::Exited { code, signal_was_ours } => {
                    debug!(?code, signal_was_ours, "Ingest worker exited");
                    self.on_worker_gone(generation, code);
                    return;
                }
                WorkerEvent::ErrorOccurred(message) => {
                    warn!(error = %message, "Ingest worker error");
                    self.on_worker_gone(generation, None);
                    return;
                }
            }
        }
        self.on_worker_gone(generation, None);
    }

    /// Unexpected end of the current worker while enabled.
    fn on_worker_gone(&self, generation: u64, code: Option<i32>) {
        let notify = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.worker = None;
            state.enabled
        };

        if notify {
            warn!(?code, "Ingest worker stopped unexpectedly");
            self.notifier.notify(RelayNotification::IngestExited { code });
            self.monitor.stop_stream_monitoring(&self.config.stream_key);
        }
        self.publish_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tracker_detects_connection_and_pushes_metrics() {
        let mut tracker = ProgressTracker::new(Duration::from_millis(1000));
        let t0 = Instant::now();

        let outcome = tracker.observe("    Stream #0:1: Audio: aac, 48000 Hz, stereo, fltp, 96 kb/s", t0);
        assert_eq!(outcome, LineOutcome::default());

        let outcome = tracker.observe("Input #0, mpegts, from 'srt://0.0.0.0:5000?mode=listener':", t0);
        assert!(outcome.connected);
        let forced = outcome.push.unwrap();
        assert_eq!(forced.audio_bitrate, Some(96_000));
        assert_eq!(forced.video_bitrate, None);

        // Within the push interval: parsed but not pushed.
        let outcome = tracker.observe(
            "frame=   30 fps=0.0 q=-1.0 size=  256kB time=00:00:01.00 bitrate=2500.5kbits/s",
            t0 + Duration::from_millis(500),
        );
        assert_eq!(outcome, LineOutcome::default());

        let outcome = tracker.observe(
            "frame=   60 fps= 30 q=-1.0 size=  512kB time=00:00:02.00 bitrate=2600.0kbits/s",
            t0 + Duration::from_millis(1500),
        );
        let forced = outcome.push.unwrap();
        assert_eq!(forced.video_bitrate, Some(2_600_000));
        assert_eq!(forced.frame_rate, Some(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_stays_quiet_until_connected() {
        let mut tracker = ProgressTracker::new(Duration::from_millis(1000));
        let outcome = tracker.observe("frame=  10 bitrate=100.0kbits/s", Instant::now());
        assert!(outcome.push.is_none());
        assert!(!outcome.connected);
    }

    #[test]
    fn zero_metrics_are_not_forced() {
        let metrics = ProgressMetrics {
            video_bitrate: 0,
            audio_bitrate: 128_000,
            fps: 0.0,
        };
        let forced = metrics.as_forced();
        assert_eq!(forced.video_bitrate, None);
        assert_eq!(forced.audio_bitrate, Some(128_000));
        assert_eq!(forced.frame_rate, None);
    }

    #[test]
    fn status_json_shape() {
        let status = IngestStatus {
            enabled: true,
            port: 5000,
            is_running: false,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"enabled":true,"port":5000,"isRunning":false}"#
        );
    }
}
