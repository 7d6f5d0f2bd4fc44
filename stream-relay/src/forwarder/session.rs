//! Per-destination session actor.
//!
//! One task per `(stream key, destination id)` owns the session's mode and
//! its current worker. Everything that can change the session (worker
//! events, poll ticks, reload commands, the fallback retry deadline and
//! cancellation) is consumed by a single `select!` loop, so transitions of
//! one session never run concurrently.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{Destination, ForwardingMode};
use crate::Error;
use crate::config::{ForwardingConfig, SourceConfig, ToolsConfig};
use crate::notification::{NotificationService, RelayNotification};
use crate::probe::LivenessProbe;
use crate::store::RelayStore;
use crate::worker::{
    SpawnedWorker, WorkerEvent, WorkerLauncher, WorkerRole, WorkerSpec, destination_locator,
    detect_fatal_marker, fallback_args, relay_args,
};

/// Dependencies shared by every session.
pub(crate) struct SessionContext {
    pub store: Arc<RelayStore>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub probe: LivenessProbe,
    pub notifier: NotificationService,
    pub tools: ToolsConfig,
    pub source: SourceConfig,
    pub config: ForwardingConfig,
}

/// Commands accepted by a running session.
pub(crate) enum SessionCommand {
    /// Tear down both workers and re-evaluate liveness.
    Reload { reply: oneshot::Sender<ForwardingMode> },
}

pub(crate) struct SessionActor {
    ctx: Arc<SessionContext>,
    stream_key: String,
    destination: Destination,
    source_locator: String,
    destination_locator: String,
    mode: ForwardingMode,
    mode_tx: watch::Sender<ForwardingMode>,
    worker: Option<SpawnedWorker>,
    fallback_retry_at: Option<Instant>,
    cancel: CancellationToken,
}

impl SessionActor {
    /// Create the actor and perform the initial transition.
    pub(crate) fn start(
        ctx: Arc<SessionContext>,
        stream_key: &str,
        destination: Destination,
        live: bool,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<ForwardingMode>) {
        let initial = if live {
            ForwardingMode::Main
        } else {
            ForwardingMode::Fallback
        };
        let (mode_tx, mode_rx) = watch::channel(initial);

        let mut actor = Self {
            source_locator: ctx.source.locator(stream_key),
            destination_locator: destination_locator(&destination.target_url, &destination.target_key),
            ctx,
            stream_key: stream_key.to_string(),
            destination,
            mode: initial,
            mode_tx,
            worker: None,
            fallback_retry_at: None,
            cancel,
        };

        if live {
            actor.enter_main();
        } else {
            actor.enter_fallback();
        }
        (actor, mode_rx)
    }

    pub(crate) async fn run(mut self, mut mailbox: mpsc::Receiver<SessionCommand>) {
        let cancel = self.cancel.clone();
        let period = self.ctx.config.poll_interval();
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(command) = mailbox.recv() => self.handle_command(command).await,

                event = next_event(&mut self.worker) => self.handle_worker_event(event),

                _ = poll.tick() => self.handle_poll_tick().await,

                _ = retry_deadline(self.fallback_retry_at) => {
                    self.fallback_retry_at = None;
                    debug!(stream_key = %self.stream_key, destination_id = self.destination.id, "Retrying fallback");
                    self.enter_fallback();
                }
            }
        }

        self.release();
        debug!(stream_key = %self.stream_key, destination_id = self.destination.id, "Session ended");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Reload { reply } => {
                info!(stream_key = %self.stream_key, destination_id = self.destination.id, "Reloading session");
                let Some(live) = self.probe_source().await else {
                    return;
                };

                self.ctx.store.processes.kill_main(&self.stream_key, self.destination.id);
                self.ctx.store.processes.kill_fallback(&self.stream_key, self.destination.id);
                self.worker = None;

                if live {
                    self.enter_main();
                } else {
                    info!(stream_key = %self.stream_key, destination_id = self.destination.id, "Source not live, staying on fallback");
                    self.enter_fallback();
                }
                let _ = reply.send(self.mode);
            }
        }
    }

    /// Re-check liveness while relaying. There is no automatic promotion
    /// from fallback; that takes a reload or a fresh start.
    async fn handle_poll_tick(&mut self) {
        if self.mode != ForwardingMode::Main {
            return;
        }
        let Some(live) = self.probe_source().await else {
            return;
        };
        if !live && self.mode == ForwardingMode::Main {
            warn!(stream_key = %self.stream_key, destination_id = self.destination.id, "Source went inactive while relaying");
            self.enter_fallback();
        }
    }

    fn handle_worker_event(&mut self, event: Option<WorkerEvent>) {
        let Some(worker) = self.worker.as_ref() else {
            return;
        };
        let role = worker.handle.role();
        let worker_id = worker.handle.id();

        let event = match event {
            Some(event) => event,
            None if worker.handle.is_kill_requested() => {
                self.worker = None;
                return;
            }
            None => WorkerEvent::ErrorOccurred("worker event stream closed".to_string()),
        };

        match event {
            WorkerEvent::Output(line) => {
                if let Some(marker) = detect_fatal_marker(&line) {
                    error!(
                        stream_key = %self.stream_key,
                        destination_id = self.destination.id,
                        %role,
                        marker = marker.as_str(),
                        "{}",
                        line
                    );
                } else {
                    trace!(%role, "{}", line);
                }
            }
            WorkerEvent::Exited {
                signal_was_ours: true,
                ..
            } => {
                debug!(%role, worker_id, "Worker terminated on request");
                self.worker = None;
            }
            WorkerEvent::Exited { code, .. } => {
                info!(
                    stream_key = %self.stream_key,
                    destination_id = self.destination.id,
                    %role,
                    ?code,
                    "Worker exited"
                );
                self.worker = None;
                match role {
                    WorkerRole::Relay => {
                        let reason = match code {
                            Some(code) => format!("relay worker exited with code {}", code),
                            None => "relay worker exited".to_string(),
                        };
                        self.on_relay_failure(worker_id, Error::runtime(reason));
                    }
                    _ => {
                        if self
                            .ctx
                            .store
                            .processes
                            .holds_fallback(&self.stream_key, self.destination.id, worker_id)
                        {
                            self.enter_fallback();
                        }
                    }
                }
            }
            WorkerEvent::ErrorOccurred(message) => {
                error!(
                    stream_key = %self.stream_key,
                    destination_id = self.destination.id,
                    %role,
                    error = %message,
                    "Worker error"
                );
                self.worker = None;
                match role {
                    WorkerRole::Relay => self.on_relay_failure(worker_id, Error::runtime(message)),
                    _ => {
                        if self
                            .ctx
                            .store
                            .processes
                            .kill_worker(&self.stream_key, self.destination.id, worker_id)
                        {
                            self.schedule_fallback_retry();
                        }
                    }
                }
            }
        }
    }

    fn on_relay_failure(&mut self, worker_id: u64, reason: Error) {
        if !self
            .ctx
            .store
            .processes
            .kill_worker(&self.stream_key, self.destination.id, worker_id)
        {
            return;
        }
        self.notify_error(&reason);
        self.enter_fallback();
    }

    /// Kill any placeholder worker, then relay the source verbatim.
    fn enter_main(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.fallback_retry_at = None;
        self.ctx.store.processes.kill_fallback(&self.stream_key, self.destination.id);
        self.ctx.store.processes.kill_main(&self.stream_key, self.destination.id);
        self.worker = None;

        let spec = WorkerSpec::new(
            WorkerRole::Relay,
            self.ctx.tools.ffmpeg_path.clone(),
            relay_args(&self.source_locator, &self.destination_locator),
        );
        match self.ctx.launcher.launch(&spec) {
            Ok(spawned) => {
                let pid = spawned.handle.pid();
                self.ctx.store.processes.set_main(
                    &self.stream_key,
                    self.destination.id,
                    spawned.handle.clone(),
                );
                self.worker = Some(spawned);
                self.set_mode(ForwardingMode::Main);
                info!(stream_key = %self.stream_key, destination_id = self.destination.id, ?pid, "Relaying main stream");
                self.ctx.notifier.notify(RelayNotification::SwitchedToMain {
                    stream_key: self.stream_key.clone(),
                    destination_id: self.destination.id,
                });
            }
            Err(e) => {
                error!(stream_key = %self.stream_key, destination_id = self.destination.id, error = %e, "Failed to start relay worker");
                self.notify_error(&e);
                self.enter_fallback();
            }
        }
    }

    /// Kill any relay worker, then stream the placeholder.
    fn enter_fallback(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.fallback_retry_at = None;
        self.set_mode(ForwardingMode::Fallback);
        self.ctx.store.processes.kill_main(&self.stream_key, self.destination.id);
        self.ctx.store.processes.kill_fallback(&self.stream_key, self.destination.id);
        self.worker = None;

        let spec = WorkerSpec::new(
            WorkerRole::Fallback,
            self.ctx.tools.ffmpeg_path.clone(),
            fallback_args(
                &self.ctx.config.fallback_image,
                &self.destination_locator,
                &self.ctx.config,
            ),
        );
        match self.ctx.launcher.launch(&spec) {
            Ok(spawned) => {
                let pid = spawned.handle.pid();
                self.ctx.store.processes.set_fallback(
                    &self.stream_key,
                    self.destination.id,
                    spawned.handle.clone(),
                );
                self.worker = Some(spawned);
                info!(stream_key = %self.stream_key, destination_id = self.destination.id, ?pid, "Streaming fallback");
                self.ctx.notifier.notify(RelayNotification::SwitchedToFallback {
                    stream_key: self.stream_key.clone(),
                    destination_id: self.destination.id,
                });
            }
            Err(e) => {
                error!(stream_key = %self.stream_key, destination_id = self.destination.id, error = %e, "Failed to start fallback worker");
                self.notify_error(&e);
                self.schedule_fallback_retry();
            }
        }
    }

    fn schedule_fallback_retry(&mut self) {
        let delay = self.ctx.config.fallback_retry_delay();
        debug!(stream_key = %self.stream_key, destination_id = self.destination.id, ?delay, "Scheduling fallback retry");
        self.fallback_retry_at = Some(Instant::now() + delay);
    }

    /// Probe the source, giving up early on cancellation.
    async fn probe_source(&self) -> Option<bool> {
        let live = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            live = self.ctx.probe.probe(&self.source_locator) => live,
        };
        (!self.cancel.is_cancelled()).then_some(live)
    }

    fn set_mode(&mut self, mode: ForwardingMode) {
        self.mode = mode;
        self.mode_tx.send_replace(mode);
    }

    fn notify_error(&self, error: &Error) {
        self.ctx.notifier.notify(RelayNotification::ForwardingError {
            destination_id: self.destination.id,
            target_url: self.destination.target_url.clone(),
            error: error.to_string(),
        });
    }

    /// Kill the worker this session still owns.
    fn release(&mut self) {
        self.fallback_retry_at = None;
        if let Some(worker) = self.worker.take() {
            self.ctx.store.processes.kill_worker(
                &self.stream_key,
                self.destination.id,
                worker.handle.id(),
            );
        }
    }
}

/// Next event of the current worker; pending forever when there is none.
async fn next_event(worker: &mut Option<SpawnedWorker>) -> Option<WorkerEvent> {
    match worker {
        Some(worker) => worker.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
