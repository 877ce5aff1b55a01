//! JSON webhook delivery

use super::Notifier;
use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::types::RunSummary;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body POSTed to a webhook for every finished run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Always "run_finished"
    pub event: String,
    /// Unix timestamp of delivery
    pub timestamp: i64,
    /// The finished run
    pub summary: RunSummary,
}

/// POSTs a [`WebhookPayload`] to one URL
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier for one endpoint
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn accepts(&self, summary: &RunSummary) -> bool {
        !self.config.skip_empty_runs
            || !(summary.successes.is_empty() && summary.failures.is_empty())
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let payload = WebhookPayload {
            event: "run_finished".to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            summary: summary.clone(),
        };

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(auth) = &self.config.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Notification {
                notifier: self.config.url.clone(),
                message: format!(
                    "Webhook returned status {}: {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}
