//! Stream metrics monitoring.
//!
//! While a stream key is publishing, the monitor probes its full technical
//! metadata every tick, derives effective bitrates and frame rate, keeps a
//! bounded rolling window plus the complete history, and fans each updated
//! series out to subscribers.

mod metrics;
mod service;

pub use metrics::{
    DerivedMetrics, ForcedMetrics, MetricSample, StreamMetricsSeries, StreamSummary,
    calculate_bitrates,
};
pub use service::StreamMonitor;
