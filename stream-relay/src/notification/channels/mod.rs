//! Notification channels.

mod telegram;

pub use telegram::{TelegramChannel, TelegramConfig};

use async_trait::async_trait;

use super::events::RelayNotification;
use crate::Result;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Send a notification through this channel.
    async fn send(&self, event: &RelayNotification) -> Result<()>;
}
