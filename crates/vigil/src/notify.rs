//! Outbound alerts.
//!
//! The watcher only needs `send(text) -> bool`: delivery is best effort and a failure is
//! logged, never fatal. [TelegramNotifier] is the production channel.

use crate::config::TelegramConfig;
use crate::oracle::Height;
use chrono::{DateTime, Local, SecondsFormat};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";
const MAX_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("alert channel returned {0}")]
    Status(reqwest::StatusCode),
}

/// Fire-and-forget alert channel.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    /// Deliver `text`; `true` on success.
    async fn send(&self, text: &str) -> bool;
}

/// Telegram Bot API notifier (`sendMessage`, Markdown).
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
    api_base: String,
    attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("configured", &self.is_configured())
            .field("api_base", &"<redacted>")
            .finish()
    }
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, NotifyError> {
        Self::with_api_url(config, TELEGRAM_API)
    }

    /// Notifier against an alternative Bot API host (used by tests).
    pub fn with_api_url(config: TelegramConfig, api_url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(8))
            .build()?;
        let api_base = format!("{}/bot{}", api_url.trim_end_matches('/'), config.bot_token);
        Ok(Self {
            config,
            client,
            api_base,
            attempts: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn send_once(&self, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(resp.status()))
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        if !self.is_configured() {
            let preview: String = text.chars().take(200).collect();
            info!(%preview, "Telegram not configured, message not sent");
            return false;
        }
        for attempt in 0..self.attempts {
            match self.send_once(text).await {
                Ok(()) => return true,
                Err(e) => warn!(
                    attempt = attempt + 1,
                    attempts = self.attempts,
                    reason = %e,
                    "Telegram send failed"
                ),
            }
            if attempt + 1 < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }
}

/// Sent once when the watcher starts.
pub fn startup_message(
    watcher: &str,
    network: &str,
    rpc_url: &str,
    validator: &str,
    poll_interval: Duration,
) -> String {
    format!(
        "✅ *Story External Watcher* started on `{}`\n\
         Network: `{}` • RPC: `{}`\n\
         VALCONS: `{}`\n\
         Interval: `{}s`",
        watcher,
        network,
        rpc_url,
        validator,
        poll_interval.as_secs()
    )
}

/// Confirmed missed block.
pub fn missed_block_message(height: Height, network: &str, watcher: &str, at: &DateTime<Local>) -> String {
    format!(
        "🚨 *Missed block*\n\
         • Height: *{}*\n\
         • Network: `{}`\n\
         • Watcher: `{}`\n\
         • Time: {}",
        height,
        network,
        watcher,
        at.to_rfc3339_opts(SecondsFormat::Secs, false)
    )
}
