//! Stream forwarding.
//!
//! A forwarding session relays one source stream to one destination. While
//! the source is verifiably live the session runs a relay worker that copies
//! the source verbatim (`Main`); otherwise it runs a placeholder worker
//! (`Fallback`). Sessions fall back on their own when the relay dies or the
//! source stops answering liveness probes, but only a reload or a fresh
//! start moves them back to `Main`.

mod session;

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use self::session::{SessionActor, SessionCommand, SessionContext};
use crate::config::{ForwardingConfig, SourceConfig, ToolsConfig};
use crate::notification::{NotificationService, RelayNotification};
use crate::probe::LivenessProbe;
use crate::store::RelayStore;
use crate::worker::WorkerLauncher;
use crate::{Error, Result};

/// Mailbox capacity of a session actor.
const SESSION_MAILBOX_CAPACITY: usize = 16;

/// One external target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Stable per forwarding request.
    pub id: u32,
    pub target_url: String,
    pub target_key: String,
}

/// Schemes a relay worker can publish to.
const SUPPORTED_SCHEMES: &[&str] = &["rtmp", "rtmps", "srt"];

impl Destination {
    pub fn new(id: u32, target_url: impl Into<String>, target_key: impl Into<String>) -> Self {
        Self {
            id,
            target_url: target_url.into(),
            target_key: target_key.into(),
        }
    }

    /// Reject destinations a worker could never publish to.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.target_url).map_err(|e| {
            Error::validation(format!("Invalid target URL '{}': {}", self.target_url, e))
        })?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(Error::validation(format!(
                "Unsupported target scheme '{}'",
                url.scheme()
            )));
        }
        if self.target_key.trim().is_empty() {
            return Err(Error::validation("Target key must not be empty"));
        }
        Ok(())
    }
}

/// What a session is currently sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingMode {
    Main,
    Fallback,
}

/// Last-known state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub mode: Option<ForwardingMode>,
    pub running: bool,
}

type SessionKey = (String, u32);

struct SessionEntry {
    mailbox: mpsc::Sender<SessionCommand>,
    mode: watch::Receiver<ForwardingMode>,
    task: JoinHandle<()>,
}

/// Owns every forwarding session.
pub struct ForwardingService {
    ctx: Arc<SessionContext>,
    sessions: DashMap<SessionKey, SessionEntry>,
    /// Serializes start/stop/reload of one pair.
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl ForwardingService {
    pub fn new(
        store: Arc<RelayStore>,
        launcher: Arc<dyn WorkerLauncher>,
        probe: LivenessProbe,
        notifier: NotificationService,
        tools: ToolsConfig,
        source: SourceConfig,
        config: ForwardingConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionContext {
                store,
                launcher,
                probe,
                notifier,
                tools,
                source,
                config,
            }),
            sessions: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn pair_lock(&self, stream_key: &str, destination_id: u32) -> Arc<Mutex<()>> {
        self.locks
            .entry((stream_key.to_string(), destination_id))
            .or_default()
            .clone()
    }

    /// Start forwarding `stream_key` to `destination`, replacing any
    /// existing session for the pair. Resolves once the session is relaying
    /// or on fallback; only an invalid destination is an error.
    pub async fn start_forwarding(
        &self,
        stream_key: &str,
        destination: Destination,
    ) -> Result<ForwardingMode> {
        destination.validate()?;
        let lock = self.pair_lock(stream_key, destination.id);
        let _guard = lock.lock().await;
        Ok(self.start_locked(stream_key, destination).await)
    }

    async fn start_locked(&self, stream_key: &str, destination: Destination) -> ForwardingMode {
        let destination_id = destination.id;
        // Previous processes must be gone before probing so two workers
        // never compete for the destination.
        self.teardown(stream_key, destination_id).await;

        let live = self
            .ctx
            .probe
            .probe(&self.ctx.source.locator(stream_key))
            .await;
        debug!(stream_key, destination_id, live, "Initial liveness");

        let cancel = CancellationToken::new();
        self.ctx
            .store
            .processes
            .set_poll(stream_key, destination_id, cancel.clone());

        let target_url = destination.target_url.clone();
        let (actor, mode) = SessionActor::start(
            Arc::clone(&self.ctx),
            stream_key,
            destination,
            live,
            cancel,
        );
        let initial = *mode.borrow();

        let (tx, rx) = mpsc::channel(SESSION_MAILBOX_CAPACITY);
        let task = tokio::spawn(actor.run(rx));
        self.sessions.insert(
            (stream_key.to_string(), destination_id),
            SessionEntry {
                mailbox: tx,
                mode,
                task,
            },
        );

        info!(stream_key, destination_id, mode = ?initial, "Forwarding started");
        self.ctx.notifier.notify(RelayNotification::ForwardingStarted {
            destination_id,
            target_url,
        });
        initial
    }

    /// Stop the session of a pair. Returns whether one existed.
    pub async fn stop_forwarding(&self, stream_key: &str, destination_id: u32) -> bool {
        let existed = self.stop_locked(stream_key, destination_id).await;
        info!(stream_key, destination_id, "Stopped forwarding");
        self.ctx
            .notifier
            .notify(RelayNotification::ForwardingStopped { destination_id });
        existed
    }

    /// Tear down both workers of a running session and re-evaluate
    /// liveness. Starts a fresh session when none is running.
    pub async fn reload_stream(
        &self,
        stream_key: &str,
        destination: Destination,
    ) -> Result<ForwardingMode> {
        destination.validate()?;
        let lock = self.pair_lock(stream_key, destination.id);
        let _guard = lock.lock().await;

        let mailbox = self
            .sessions
            .get(&(stream_key.to_string(), destination.id))
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| (entry.mailbox.clone(), entry.mode.clone()));

        if let Some((mailbox, last_mode)) = mailbox {
            let (reply, response) = oneshot::channel();
            if mailbox.send(SessionCommand::Reload { reply }).await.is_ok() {
                return Ok(match response.await {
                    Ok(mode) => mode,
                    Err(_) => {
                        // Stopped while reloading; never resurrect a stopped session.
                        warn!(stream_key, destination_id = destination.id, "Session ended during reload");
                        *last_mode.borrow()
                    }
                });
            }
            warn!(stream_key, destination_id = destination.id, "Session mailbox closed, restarting");
        }

        Ok(self.start_locked(stream_key, destination).await)
    }

    /// Stop every destination of a stream. Returns the destination ids stopped.
    pub async fn stop_all_forwarding(&self, stream_key: &str) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .sessions
            .iter()
            .filter(|e| e.key().0 == stream_key)
            .map(|e| e.key().1)
            .collect();

        join_all(ids.iter().map(|&id| self.stop_locked(stream_key, id))).await;

        for id in self.ctx.store.processes.stop_all_for_stream(stream_key) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        info!(stream_key, destinations = ?ids, "Stopped all forwarding for stream");
        ids
    }

    /// Teardown under the pair lock so a concurrent start or reload finishes first.
    async fn stop_locked(&self, stream_key: &str, destination_id: u32) -> bool {
        let existed = {
            let lock = self.pair_lock(stream_key, destination_id);
            let _guard = lock.lock().await;
            self.teardown(stream_key, destination_id).await
        };
        self.prune_lock(stream_key, destination_id);
        existed
    }

    /// Drop the pair lock unless another caller is holding or waiting on it.
    fn prune_lock(&self, stream_key: &str, destination_id: u32) {
        self.locks
            .remove_if(&(stream_key.to_string(), destination_id), |_, lock| {
                Arc::strong_count(lock) == 1
            });
    }

    /// Last-known state of a pair; never fails for unknown sessions.
    pub fn status(&self, stream_key: &str, destination_id: u32) -> SessionStatus {
        let mode = self
            .sessions
            .get(&(stream_key.to_string(), destination_id))
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| *entry.mode.borrow());

        let processes = &self.ctx.store.processes;
        let running = mode.is_some()
            && (processes.main(stream_key, destination_id).is_some()
                || processes.fallback(stream_key, destination_id).is_some());

        SessionStatus { mode, running }
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        join_all(keys.iter().map(|(key, id)| self.stop_locked(key, *id))).await;
        for stream_key in self.ctx.store.processes.stream_keys() {
            self.ctx.store.processes.stop_all_for_stream(&stream_key);
        }
    }

    /// Kill the pair's workers, cancel its timer and wait for its actor.
    async fn teardown(&self, stream_key: &str, destination_id: u32) -> bool {
        self.ctx.store.processes.stop_all(stream_key, destination_id);

        let Some((_, entry)) = self
            .sessions
            .remove(&(stream_key.to_string(), destination_id))
        else {
            return false;
        };
        if let Err(e) = entry.task.await {
            warn!(stream_key, destination_id, error = %e, "Session task failed");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::fanout::SubscriberHub;
    use crate::probe::{InspectDepth, ProbeReport, StreamInspector};
    use crate::worker::{SpawnedWorker, WorkerEvent, WorkerHandle, WorkerSpec};

    struct Unreachable;

    #[async_trait]
    impl StreamInspector for Unreachable {
        async fn inspect(&self, locator: &str, _depth: InspectDepth) -> Result<ProbeReport> {
            Err(Error::probe(format!("{}: unreachable", locator)))
        }
    }

    /// Keeps every event sender so workers stay alive until killed.
    #[derive(Default)]
    struct IdleLauncher {
        senders: parking_lot::Mutex<Vec<mpsc::Sender<WorkerEvent>>>,
    }

    impl WorkerLauncher for IdleLauncher {
        fn launch(&self, spec: &WorkerSpec) -> Result<SpawnedWorker> {
            let (tx, rx) = mpsc::channel(4);
            self.senders.lock().push(tx);
            Ok(SpawnedWorker {
                handle: WorkerHandle::new(spec.role, None, CancellationToken::new()),
                events: rx,
            })
        }
    }

    fn service() -> ForwardingService {
        ForwardingService::new(
            Arc::new(RelayStore::new()),
            Arc::new(IdleLauncher::default()),
            LivenessProbe::new(Arc::new(Unreachable), 1, Duration::ZERO),
            NotificationService::new(SubscriberHub::new()),
            ToolsConfig::default(),
            SourceConfig::default(),
            ForwardingConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn pair_locks_are_released_after_stop() {
        let forwarding = service();
        let destination = Destination::new(0, "rtmp://a/app", "k");

        let mode = forwarding.start_forwarding("cam1", destination.clone()).await.unwrap();
        assert_eq!(mode, ForwardingMode::Fallback);
        assert_eq!(forwarding.locks.len(), 1);

        assert!(forwarding.stop_forwarding("cam1", 0).await);
        assert!(forwarding.locks.is_empty());

        forwarding.start_forwarding("cam1", destination.clone()).await.unwrap();
        forwarding.start_forwarding("cam2", destination).await.unwrap();
        assert_eq!(forwarding.stop_all_forwarding("cam1").await, vec![0]);
        assert_eq!(forwarding.locks.len(), 1);

        forwarding.shutdown().await;
        assert!(forwarding.locks.is_empty());
        assert!(forwarding.sessions.is_empty());
    }

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ForwardingMode::Fallback).unwrap(), r#""fallback""#);
    }

    #[test]
    fn destination_json_uses_camel_case() {
        let d: Destination =
            serde_json::from_str(r#"{"id": 1, "targetUrl": "rtmp://a/app", "targetKey": "k"}"#)
                .unwrap();
        assert_eq!(d, Destination::new(1, "rtmp://a/app", "k"));
    }

    #[test]
    fn destination_validation() {
        assert!(Destination::new(0, "rtmp://a.rtmp.youtube.com/live2", "key").validate().is_ok());
        assert!(Destination::new(0, "srt://ingest.example:9000", "key").validate().is_ok());

        let err = Destination::new(0, "not a url", "key").validate().unwrap_err();
        assert!(err.is_caller_facing());
        assert!(Destination::new(0, "http://example.com/live", "key").validate().is_err());
        assert!(Destination::new(0, "rtmp://example.com/live", " ").validate().is_err());
    }

    #[test]
    fn status_json_shape() {
        let status = SessionStatus {
            mode: None,
            running: false,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"mode":null,"running":false}"#
        );
    }
}
