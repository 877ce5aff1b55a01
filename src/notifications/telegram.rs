//! Telegram Bot API delivery

use super::{Notifier, format_summary};
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use crate::types::RunSummary;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends the plain-text summary through `sendMessage`
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Create a notifier for one bot/chat pair
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TELEGRAM_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let text = format_summary(summary);
        let response = self
            .client
            .post(self.endpoint())
            .json(&SendMessage {
                chat_id: &self.config.chat_id,
                text: &text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            // The token is part of the URL, so only the status and body are reported
            return Err(Error::Notification {
                notifier: self.name().to_string(),
                message: format!(
                    "Telegram returned status {}: {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}
