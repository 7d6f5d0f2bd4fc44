//! Telegram Bot API notification channel.
//!
//! Sends messages via the Telegram Bot API (`POST /bot<token>/sendMessage`).
//! Handles 429 rate limits by respecting the `parameters.retry_after` field
//! returned in the JSON response body.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::config::NotificationConfig;
use crate::notification::events::{NotificationPriority, RelayNotification};
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram channel configuration.
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Overrides `https://api.telegram.org`.
    pub api_base: Option<String>,
}

impl TelegramConfig {
    /// Build from the engine settings; `None` unless both token and chat id are set.
    pub fn from_settings(settings: &NotificationConfig) -> Option<Self> {
        let bot_token = settings.telegram_bot_token.as_deref()?.trim();
        let chat_id = settings.telegram_chat_id.as_deref()?.trim();
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            api_base: None,
        })
    }
}

/// Install the process-wide rustls crypto provider once.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Telegram notification channel.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(config: TelegramConfig) -> Self {
        install_rustls_provider();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default Telegram HTTP client");
                Client::new()
            });
        Self { config, client }
    }

    /// Build the message text for an event.
    fn build_message(&self, event: &RelayNotification) -> String {
        let emoji = match event.priority() {
            NotificationPriority::Low => "\u{23f9}\u{fe0f}",  // ⏹️
            NotificationPriority::Normal => "\u{1f504}",      // 🔄
            NotificationPriority::High => "\u{26a0}\u{fe0f}", // ⚠️
        };

        let text = format!(
            "{emoji} <b>{}</b>\n\n{}",
            escape_html(event.title()),
            escape_html(&event.description())
        );
        truncate_message(&text, TELEGRAM_MESSAGE_LIMIT)
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or("https://api.telegram.org")
            .trim_end_matches('/');
        format!("{}/bot{}/sendMessage", base, self.config.bot_token)
    }

    /// Send request with rate limit handling.
    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let url = self.endpoint();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Notification(format!("Telegram request failed: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(|v| v.as_u64())
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::Notification(format!(
                        "Telegram rate limit exceeded after {} retries",
                        MAX_RATE_LIMIT_RETRIES
                    )));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Telegram sendMessage failed: {} - {}",
                status, body
            )));
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    fn is_enabled(&self) -> bool {
        !self.config.bot_token.is_empty() && !self.config.chat_id.is_empty()
    }

    async fn send(&self, event: &RelayNotification) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let payload = json!({
            "chat_id": self.config.chat_id,
            "text": self.build_message(event),
            "parse_mode": "HTML",
        });
        self.send_with_retry(&payload).await?;

        debug!("Telegram notification sent: {}", event.event_type());
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Truncate a message to fit within the Telegram character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> TelegramChannel {
        TelegramChannel::new(TelegramConfig {
            bot_token: "123:ABC".to_string(),
            chat_id: "456".to_string(),
            api_base: None,
        })
    }

    #[test]
    fn config_requires_token_and_chat() {
        let mut settings = NotificationConfig::default();
        assert!(TelegramConfig::from_settings(&settings).is_none());

        settings.telegram_bot_token = Some("123:ABC".to_string());
        assert!(TelegramConfig::from_settings(&settings).is_none());

        settings.telegram_chat_id = Some(" 456 ".to_string());
        let config = TelegramConfig::from_settings(&settings).unwrap();
        assert_eq!(config.chat_id, "456");
    }

    #[test]
    fn channel_enabled_state() {
        assert!(channel().is_enabled());
        assert!(!TelegramChannel::new(TelegramConfig::default()).is_enabled());
    }

    #[test]
    fn endpoint_uses_token() {
        assert_eq!(
            channel().endpoint(),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn message_is_html_escaped() {
        let msg = channel().build_message(&RelayNotification::IngestFailed {
            error: "<boom> & more".to_string(),
        });
        assert!(msg.contains("<b>SRT ingest error</b>"));
        assert!(msg.contains("&lt;boom&gt; &amp; more"));
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("hello", 100), "hello");

        let long: String = "a".repeat(5000);
        let truncated = truncate_message(&long, TELEGRAM_MESSAGE_LIMIT);
        assert!(truncated.chars().count() <= TELEGRAM_MESSAGE_LIMIT);
        assert!(truncated.ends_with("[truncated]"));
    }
}
