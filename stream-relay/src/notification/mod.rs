//! Notifications.
//!
//! Every mode switch, forwarding error, stream end and ingest state change
//! becomes a [`RelayNotification`]. The [`NotificationService`] mirrors it
//! onto the system fan-out channel and delivers it to configured channels
//! (currently Telegram) without ever blocking or failing the caller.

pub mod channels;
mod events;
mod service;

pub use channels::{NotificationChannel, TelegramChannel, TelegramConfig};
pub use events::{NotificationPriority, RelayNotification};
pub use service::NotificationService;
