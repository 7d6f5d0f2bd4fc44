//! Process registry.
//!
//! Tracks, per `(stream key, destination id)` pair, at most one relay
//! worker, at most one fallback worker and at most one session timer
//! token. The registry is the only place that terminates workers.
//!
//! Setters replace without killing; callers kill first. Kills are
//! synchronous requests (see [`WorkerHandle::kill`]) and ignore workers that
//! already exited. Inner maps are dropped as soon as they become empty.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::WorkerHandle;

type Slot<T> = HashMap<String, HashMap<u32, T>>;

#[derive(Default)]
struct Slots {
    main: Slot<WorkerHandle>,
    fallback: Slot<WorkerHandle>,
    polls: Slot<CancellationToken>,
}

/// Registry of worker handles and session timers.
#[derive(Default)]
pub struct ProcessRegistry {
    slots: Mutex<Slots>,
}

fn insert<T>(slot: &mut Slot<T>, stream_key: &str, destination_id: u32, value: T) -> Option<T> {
    slot.entry(stream_key.to_string())
        .or_default()
        .insert(destination_id, value)
}

fn take<T>(slot: &mut Slot<T>, stream_key: &str, destination_id: u32) -> Option<T> {
    let inner = slot.get_mut(stream_key)?;
    let value = inner.remove(&destination_id);
    if inner.is_empty() {
        slot.remove(stream_key);
    }
    value
}

fn get<T: Clone>(slot: &Slot<T>, stream_key: &str, destination_id: u32) -> Option<T> {
    slot.get(stream_key)?.get(&destination_id).cloned()
}

/// Remove the handle only when it is the given worker instance.
fn take_if(
    slot: &mut Slot<WorkerHandle>,
    stream_key: &str,
    destination_id: u32,
    worker_id: u64,
) -> Option<WorkerHandle> {
    let matches = slot
        .get(stream_key)
        .and_then(|inner| inner.get(&destination_id))
        .is_some_and(|h| h.id() == worker_id);
    if matches {
        take(slot, stream_key, destination_id)
    } else {
        None
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the relay worker of a pair, returning the displaced handle unkilled.
    pub fn set_main(
        &self,
        stream_key: &str,
        destination_id: u32,
        handle: WorkerHandle,
    ) -> Option<WorkerHandle> {
        let previous = insert(&mut self.slots.lock().main, stream_key, destination_id, handle);
        if previous.as_ref().is_some_and(|h| !h.is_kill_requested()) {
            warn!(stream_key, destination_id, "Replaced a relay worker that was never killed");
        }
        previous
    }

    /// Register the fallback worker of a pair, returning the displaced handle unkilled.
    pub fn set_fallback(
        &self,
        stream_key: &str,
        destination_id: u32,
        handle: WorkerHandle,
    ) -> Option<WorkerHandle> {
        let previous = insert(
            &mut self.slots.lock().fallback,
            stream_key,
            destination_id,
            handle,
        );
        if previous.as_ref().is_some_and(|h| !h.is_kill_requested()) {
            warn!(stream_key, destination_id, "Replaced a fallback worker that was never killed");
        }
        previous
    }

    pub fn main(&self, stream_key: &str, destination_id: u32) -> Option<WorkerHandle> {
        get(&self.slots.lock().main, stream_key, destination_id)
    }

    pub fn fallback(&self, stream_key: &str, destination_id: u32) -> Option<WorkerHandle> {
        get(&self.slots.lock().fallback, stream_key, destination_id)
    }

    /// Whether the registered fallback of the pair is the given worker instance.
    pub fn holds_fallback(&self, stream_key: &str, destination_id: u32, worker_id: u64) -> bool {
        self.fallback(stream_key, destination_id)
            .is_some_and(|h| h.id() == worker_id)
    }

    /// Kill and forget the relay worker of a pair. Returns whether one was registered.
    pub fn kill_main(&self, stream_key: &str, destination_id: u32) -> bool {
        let handle = take(&mut self.slots.lock().main, stream_key, destination_id);
        kill(handle, stream_key, destination_id)
    }

    /// Kill and forget the fallback worker of a pair. Returns whether one was registered.
    pub fn kill_fallback(&self, stream_key: &str, destination_id: u32) -> bool {
        let handle = take(&mut self.slots.lock().fallback, stream_key, destination_id);
        kill(handle, stream_key, destination_id)
    }

    /// Kill a specific worker instance wherever it is registered for the pair.
    pub fn kill_worker(&self, stream_key: &str, destination_id: u32, worker_id: u64) -> bool {
        let handle = {
            let mut slots = self.slots.lock();
            take_if(&mut slots.main, stream_key, destination_id, worker_id)
                .or_else(|| take_if(&mut slots.fallback, stream_key, destination_id, worker_id))
        };
        kill(handle, stream_key, destination_id)
    }

    /// Register the session timer of a pair. A displaced token is cancelled.
    pub fn set_poll(&self, stream_key: &str, destination_id: u32, token: CancellationToken) {
        if let Some(previous) = insert(&mut self.slots.lock().polls, stream_key, destination_id, token)
        {
            previous.cancel();
        }
    }

    pub fn cancel_poll(&self, stream_key: &str, destination_id: u32) -> bool {
        match take(&mut self.slots.lock().polls, stream_key, destination_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_poll(&self, stream_key: &str, destination_id: u32) -> bool {
        get(&self.slots.lock().polls, stream_key, destination_id).is_some()
    }

    /// Kill both workers and cancel the timer of a pair. Idempotent.
    pub fn stop_all(&self, stream_key: &str, destination_id: u32) {
        self.kill_main(stream_key, destination_id);
        self.kill_fallback(stream_key, destination_id);
        self.cancel_poll(stream_key, destination_id);
        debug!(stream_key, destination_id, "Stopped all processes for destination");
    }

    /// Apply [`stop_all`](Self::stop_all) to every destination of a stream.
    /// Returns the destination ids that had anything registered.
    pub fn stop_all_for_stream(&self, stream_key: &str) -> Vec<u32> {
        let ids = self.destination_ids(stream_key);
        for &id in &ids {
            self.stop_all(stream_key, id);
        }
        ids
    }

    /// Destination ids with any slot in use under a stream key.
    pub fn destination_ids(&self, stream_key: &str) -> Vec<u32> {
        let slots = self.slots.lock();
        let mut ids = BTreeSet::new();
        for slot in [&slots.main, &slots.fallback] {
            if let Some(inner) = slot.get(stream_key) {
                ids.extend(inner.keys().copied());
            }
        }
        if let Some(inner) = slots.polls.get(stream_key) {
            ids.extend(inner.keys().copied());
        }
        ids.into_iter().collect()
    }

    /// Whether no map holds any entry for the stream key.
    pub fn is_empty_for(&self, stream_key: &str) -> bool {
        let slots = self.slots.lock();
        !slots.main.contains_key(stream_key)
            && !slots.fallback.contains_key(stream_key)
            && !slots.polls.contains_key(stream_key)
    }

    /// Every stream key with anything registered.
    pub fn stream_keys(&self) -> Vec<String> {
        let slots = self.slots.lock();
        let mut keys: BTreeSet<String> = slots.main.keys().cloned().collect();
        keys.extend(slots.fallback.keys().cloned());
        keys.extend(slots.polls.keys().cloned());
        keys.into_iter().collect()
    }
}

fn kill(handle: Option<WorkerHandle>, stream_key: &str, destination_id: u32) -> bool {
    match handle {
        Some(handle) => {
            debug!(
                stream_key,
                destination_id,
                worker_id = handle.id(),
                role = %handle.role(),
                "Killing worker"
            );
            handle.kill();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerRole;

    fn handle(role: WorkerRole) -> WorkerHandle {
        WorkerHandle::new(role, None, CancellationToken::new())
    }

    #[test]
    fn set_does_not_kill_previous() {
        let registry = ProcessRegistry::new();
        let first = handle(WorkerRole::Relay);
        registry.set_main("cam1", 0, first.clone());
        let displaced = registry.set_main("cam1", 0, handle(WorkerRole::Relay)).unwrap();

        assert_eq!(displaced.id(), first.id());
        assert!(!first.is_kill_requested());
    }

    #[test]
    fn kill_removes_entry_and_empty_map() {
        let registry = ProcessRegistry::new();
        let h = handle(WorkerRole::Fallback);
        registry.set_fallback("cam1", 2, h.clone());

        assert!(registry.kill_fallback("cam1", 2));
        assert!(h.is_kill_requested());
        assert!(registry.fallback("cam1", 2).is_none());
        assert!(registry.is_empty_for("cam1"));

        // Already gone.
        assert!(!registry.kill_fallback("cam1", 2));
    }

    #[test]
    fn lookups_never_assume_presence() {
        let registry = ProcessRegistry::new();
        assert!(registry.main("nope", 0).is_none());
        assert!(registry.fallback("nope", 0).is_none());
        assert!(!registry.kill_main("nope", 0));
        assert!(!registry.cancel_poll("nope", 0));
        registry.stop_all("nope", 0);
    }

    #[test]
    fn stop_all_kills_both_and_cancels_timer() {
        let registry = ProcessRegistry::new();
        let main = handle(WorkerRole::Relay);
        let fallback = handle(WorkerRole::Fallback);
        let timer = CancellationToken::new();
        registry.set_main("cam1", 0, main.clone());
        registry.set_fallback("cam1", 0, fallback.clone());
        registry.set_poll("cam1", 0, timer.clone());

        registry.stop_all("cam1", 0);
        registry.stop_all("cam1", 0);

        assert!(main.is_kill_requested());
        assert!(fallback.is_kill_requested());
        assert!(timer.is_cancelled());
        assert!(registry.is_empty_for("cam1"));
    }

    #[test]
    fn stop_all_for_stream_covers_every_destination() {
        let registry = ProcessRegistry::new();
        registry.set_main("cam1", 0, handle(WorkerRole::Relay));
        registry.set_poll("cam1", 0, CancellationToken::new());
        registry.set_fallback("cam1", 1, handle(WorkerRole::Fallback));
        registry.set_poll("cam1", 1, CancellationToken::new());
        registry.set_main("cam2", 0, handle(WorkerRole::Relay));

        assert_eq!(registry.stop_all_for_stream("cam1"), vec![0, 1]);
        assert!(registry.is_empty_for("cam1"));
        assert!(registry.main("cam2", 0).is_some());
        assert_eq!(registry.stream_keys(), vec!["cam2".to_string()]);
    }

    #[test]
    fn kill_worker_matches_instance() {
        let registry = ProcessRegistry::new();
        let old = handle(WorkerRole::Fallback);
        let current = handle(WorkerRole::Fallback);
        registry.set_fallback("cam1", 0, current.clone());

        assert!(!registry.kill_worker("cam1", 0, old.id()));
        assert!(!current.is_kill_requested());
        assert!(registry.holds_fallback("cam1", 0, current.id()));

        assert!(registry.kill_worker("cam1", 0, current.id()));
        assert!(current.is_kill_requested());
        assert!(!registry.holds_fallback("cam1", 0, current.id()));
    }

    #[test]
    fn set_poll_cancels_displaced_timer() {
        let registry = ProcessRegistry::new();
        let first = CancellationToken::new();
        registry.set_poll("cam1", 0, first.clone());
        registry.set_poll("cam1", 0, CancellationToken::new());
        assert!(first.is_cancelled());
        assert!(registry.has_poll("cam1", 0));
    }
}
