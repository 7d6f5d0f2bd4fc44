//! Ingest-server publish hooks.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::monitor::StreamMonitor;

/// Stream key of a published path: its final non-empty segment, query excluded.
pub fn stream_key_from_path(stream_path: &str) -> Option<&str> {
    let path = stream_path
        .split_once('?')
        .map_or(stream_path, |(path, _)| path);
    path.rsplit('/').find(|segment| !segment.is_empty())
}

/// Callbacks fired by the ingest server when a stream starts or stops
/// publishing. Forwarding sessions are left alone on unpublish; they drop
/// to fallback through their own polling.
#[derive(Clone)]
pub struct PublishHooks {
    monitor: Arc<StreamMonitor>,
}

impl PublishHooks {
    pub fn new(monitor: Arc<StreamMonitor>) -> Self {
        Self { monitor }
    }

    pub fn on_publish_start(&self, stream_path: &str, args: &str) {
        debug!(stream_path, args, "Publish started");
        match stream_key_from_path(stream_path) {
            Some(stream_key) => {
                info!(stream_key, "Stream published");
                self.monitor.start_stream_monitoring(stream_key, None);
            }
            None => warn!(stream_path, "Ignoring publish without a stream key"),
        }
    }

    pub fn on_publish_stop(&self, stream_path: &str, args: &str) {
        debug!(stream_path, args, "Publish stopped");
        match stream_key_from_path(stream_path) {
            Some(stream_key) => {
                info!(stream_key, "Stream unpublished");
                self.monitor.stop_stream_monitoring(stream_key);
            }
            None => warn!(stream_path, "Ignoring unpublish without a stream key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_last_segment() {
        assert_eq!(stream_key_from_path("/live/cam1"), Some("cam1"));
        assert_eq!(stream_key_from_path("/live/cam1/"), Some("cam1"));
        assert_eq!(stream_key_from_path("/live/cam1?token=abc"), Some("cam1"));
        assert_eq!(stream_key_from_path("cam1"), Some("cam1"));
        assert_eq!(stream_key_from_path("/"), None);
        assert_eq!(stream_key_from_path(""), None);
    }
}
