//! Fire-and-forget notification dispatch.

use std::sync::Arc;

use tracing::{info, warn};

use super::channels::{NotificationChannel, TelegramChannel, TelegramConfig};
use super::events::RelayNotification;
use crate::config::NotificationConfig;
use crate::fanout::{NotificationRecord, SubscriberHub, SystemUpdate};

/// Mirrors every notification onto the system fan-out channel and hands it
/// to each enabled channel on a detached task. Channel failures are logged
/// and never reach the caller.
#[derive(Clone)]
pub struct NotificationService {
    channels: Arc<Vec<Arc<dyn NotificationChannel>>>,
    hub: SubscriberHub,
}

impl NotificationService {
    /// A service with no outbound channels.
    pub fn new(hub: SubscriberHub) -> Self {
        Self {
            channels: Arc::new(Vec::new()),
            hub,
        }
    }

    /// Build channels from the engine settings.
    pub fn from_config(config: &NotificationConfig, hub: SubscriberHub) -> Self {
        let mut service = Self::new(hub);
        if let Some(telegram) = TelegramConfig::from_settings(config) {
            service = service.with_channel(Arc::new(TelegramChannel::new(telegram)));
        }
        service
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        Arc::make_mut(&mut self.channels).push(channel);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn notify(&self, event: RelayNotification) {
        let message = event.description();
        info!(event_type = event.event_type(), "{}", message);

        self.hub
            .publish_system(SystemUpdate::Notification(NotificationRecord {
                event_type: event.event_type(),
                message,
                timestamp: chrono::Utc::now(),
            }));

        let enabled: Vec<_> = self
            .channels
            .iter()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect();
        if enabled.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for channel in enabled {
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                if let Err(e) = channel.send(&event).await {
                    warn!(
                        channel = channel.channel_type(),
                        event_type = event.event_type(),
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            });
        }
    }
}
