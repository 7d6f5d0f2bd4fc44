//! Best-effort liveness check with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::inspector::{InspectDepth, StreamInspector};
use crate::config::ProbeConfig;

/// Answers "does this source currently carry any decodable stream?".
///
/// Never fails: inspector errors are retried a fixed number of times with a
/// fixed delay, after which the source is reported as not live.
#[derive(Clone)]
pub struct LivenessProbe {
    inspector: Arc<dyn StreamInspector>,
    retries: u32,
    retry_delay: Duration,
}

impl LivenessProbe {
    pub fn new(inspector: Arc<dyn StreamInspector>, retries: u32, retry_delay: Duration) -> Self {
        Self {
            inspector,
            retries: retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(inspector: Arc<dyn StreamInspector>, config: &ProbeConfig) -> Self {
        Self::new(inspector, config.retries, config.retry_delay())
    }

    /// Probe `locator`. `true` iff the inspector lists at least one stream.
    pub async fn probe(&self, locator: &str) -> bool {
        for attempt in 1..=self.retries {
            match self
                .inspector
                .inspect(locator, InspectDepth::StreamTypes)
                .await
            {
                Ok(report) => {
                    let live = report.has_streams();
                    debug!(locator, live, attempt, "Liveness probe finished");
                    return live;
                }
                Err(e) if attempt < self.retries => {
                    debug!(locator, attempt, error = %e, "Liveness probe failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        locator,
                        attempts = self.retries,
                        error = %e,
                        "Liveness probe exhausted retries, treating source as inactive"
                    );
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::report::{ProbeReport, ProbeStream};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results; repeats the last one when exhausted.
    struct Scripted {
        results: Mutex<VecDeque<Result<bool>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(results: Vec<Result<bool>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl StreamInspector for Scripted {
        async fn inspect(&self, _locator: &str, depth: InspectDepth) -> Result<ProbeReport> {
            assert_eq!(depth, InspectDepth::StreamTypes);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::probe("exhausted")));
            next.map(|live| ProbeReport {
                streams: if live {
                    vec![ProbeStream {
                        codec_type: Some("video".to_string()),
                        ..Default::default()
                    }]
                } else {
                    Vec::new()
                },
                format: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_resolve_to_false() {
        let inspector = Scripted::new(vec![
            Err(Error::probe("exit 1")),
            Err(Error::probe("timeout")),
            Err(Error::probe("malformed")),
        ]);
        let probe = LivenessProbe::new(inspector.clone(), 3, Duration::from_millis(1000));

        let started = tokio::time::Instant::now();
        assert!(!probe.probe("rtmp://x/live/cam1").await);
        assert_eq!(inspector.calls.load(Ordering::SeqCst), 3);
        // Two delays between three attempts.
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let inspector = Scripted::new(vec![Err(Error::probe("exit 1")), Ok(true)]);
        let probe = LivenessProbe::new(inspector.clone(), 3, Duration::from_millis(1000));

        assert!(probe.probe("rtmp://x/live/cam1").await);
        assert_eq!(inspector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_stream_list_is_not_live_without_retry() {
        let inspector = Scripted::new(vec![Ok(false), Ok(true)]);
        let probe = LivenessProbe::new(inspector.clone(), 3, Duration::from_millis(1000));

        assert!(!probe.probe("rtmp://x/live/cam1").await);
        assert_eq!(inspector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_still_probes_once() {
        let inspector = Scripted::new(vec![Ok(true)]);
        let probe = LivenessProbe::new(inspector.clone(), 0, Duration::ZERO);
        assert!(probe.probe("rtmp://x/live/cam1").await);
    }
}
