//! Shared live state.

use dashmap::DashMap;

use crate::monitor::{ForcedMetrics, StreamMetricsSeries};
use crate::registry::ProcessRegistry;

/// Process-wide live state: worker handles, metric series and forced
/// metric overrides. Nothing here survives a restart.
///
/// Constructed once and shared as `Arc<RelayStore>`; tests build a fresh one.
#[derive(Default)]
pub struct RelayStore {
    pub processes: ProcessRegistry,
    pub metrics: DashMap<String, StreamMetricsSeries>,
    pub forced: DashMap<String, ForcedMetrics>,
}

impl RelayStore {
    pub fn new() -> Self {
        Self::default()
    }
}
