//! Host metrics sampler.

use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Networks, RefreshKind, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fanout::{SubscriberHub, SystemUpdate};

/// One host sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetrics {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// Global CPU usage in percent.
    pub cpu: f32,
    pub memory: MemoryUsage,
    /// Aggregate receive rate in bytes per second.
    pub download: f64,
    /// Aggregate transmit rate in bytes per second.
    pub upload: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

/// Bytes per second between two cumulative counters.
///
/// Zero for the first sample, a counter that went backwards, or no elapsed time.
pub fn rate_per_second(previous: Option<u64>, current: u64, elapsed: Duration) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / secs
}

/// Samples CPU, memory and network counters.
pub struct HostSampler {
    system: System,
    networks: Networks,
    last: Option<(u64, u64, Instant)>,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            ),
            networks: Networks::new_with_refreshed_list(),
            last: None,
        }
    }

    pub fn sample(&mut self) -> HostMetrics {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let (rx, tx) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });
        let now = Instant::now();

        let (download, upload) = match self.last {
            Some((last_rx, last_tx, at)) => {
                let elapsed = now.duration_since(at);
                (
                    rate_per_second(Some(last_rx), rx, elapsed),
                    rate_per_second(Some(last_tx), tx, elapsed),
                )
            }
            None => (0.0, 0.0),
        };
        self.last = Some((rx, tx, now));

        HostMetrics {
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu: self.system.global_cpu_usage(),
            memory: MemoryUsage {
                used: self.system.used_memory(),
                total: self.system.total_memory(),
            },
            download,
            upload,
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish host metrics on the system channel every `interval` while
/// anyone is subscribed.
pub fn spawn_host_sampler(
    hub: SubscriberHub,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = HostSampler::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if hub.system_subscribers() == 0 {
                        continue;
                    }
                    let metrics = sampler.sample();
                    hub.publish_system(SystemUpdate::Host(metrics));
                }
            }
        }
        debug!("Host sampler stopped");
    })
}
