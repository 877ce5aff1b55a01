//! Run summary notifications
//!
//! Every finished run is handed to a [`NotificationHub`], which fans it out to
//! the configured [`Notifier`]s on a background task. Delivery never blocks or
//! fails the run: errors are logged and broadcast as
//! [`Event::NotificationFailed`].

mod telegram;
mod webhook;

pub use telegram::TelegramNotifier;
pub use webhook::{WebhookNotifier, WebhookPayload};

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::types::{Event, ItemOutcome, RunSummary};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Longest message body sent to chat-style notifiers
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Items listed per section before collapsing into "(+n more)"
const MAX_LISTED_ITEMS: usize = 20;

/// Delivery channel for run summaries
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs and [`Event::NotificationFailed`]
    fn name(&self) -> &str;

    /// Whether this notifier wants `summary` at all
    fn accepts(&self, summary: &RunSummary) -> bool {
        !(summary.successes.is_empty() && summary.failures.is_empty())
    }

    /// Deliver one summary
    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Fire-and-forget fan-out to every configured notifier
#[derive(Clone)]
pub struct NotificationHub {
    notifiers: Vec<Arc<dyn Notifier>>,
    event_tx: broadcast::Sender<Event>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.notifiers.iter().map(|n| n.name()).collect();
        f.debug_struct("NotificationHub")
            .field("notifiers", &names)
            .finish()
    }
}

impl NotificationHub {
    /// Hub with no notifiers
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            notifiers: Vec::new(),
            event_tx,
        }
    }

    /// Build the Telegram and webhook notifiers named in `config`
    pub fn from_config(config: &NotificationConfig, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let mut hub = Self::new(event_tx);
        if let Some(telegram) = &config.telegram {
            hub = hub.with_notifier(Arc::new(TelegramNotifier::new(telegram.clone())?));
        }
        for webhook in &config.webhooks {
            hub = hub.with_notifier(Arc::new(WebhookNotifier::new(webhook.clone())?));
        }
        Ok(hub)
    }

    /// Add a notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Number of notifiers
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Whether no notifiers are configured
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver `summary` on a background task
    ///
    /// Returns `None` when no notifier wants the summary.
    pub fn dispatch(&self, summary: &RunSummary) -> Option<JoinHandle<()>> {
        let interested: Vec<Arc<dyn Notifier>> = self
            .notifiers
            .iter()
            .filter(|n| n.accepts(summary))
            .cloned()
            .collect();

        if interested.is_empty() {
            return None;
        }

        let summary = Arc::new(summary.clone());
        let event_tx = self.event_tx.clone();

        Some(tokio::spawn(async move {
            for notifier in interested {
                match notifier.notify(&summary).await {
                    Ok(()) => {
                        tracing::debug!(notifier = notifier.name(), run_id = %summary.run_id, "notification sent");
                    }
                    Err(e) => {
                        tracing::warn!(notifier = notifier.name(), run_id = %summary.run_id, error = %e, "notification failed");
                        event_tx
                            .send(Event::NotificationFailed {
                                notifier: notifier.name().to_string(),
                                error: e.to_string(),
                            })
                            .ok();
                    }
                }
            }
        }))
    }
}

/// Human-readable duration ("1h 2m 3s", "4m 5s", "6s")
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

fn item_label(outcome: &ItemOutcome) -> &str {
    outcome.title.as_deref().unwrap_or(&outcome.item_id)
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[ItemOutcome], limit: usize) {
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(title.to_string());
    for outcome in items.iter().take(limit) {
        match outcome.error_kind {
            Some(kind) => lines.push(format!("- {} [{}]", item_label(outcome), kind)),
            None => lines.push(format!("- {}", item_label(outcome))),
        }
    }
    if items.len() > limit {
        lines.push(format!("(+{} more)", items.len() - limit));
    }
}

fn build_message(summary: &RunSummary, limit: usize) -> String {
    let status = if summary.cancelled {
        "cancelled"
    } else if summary.failures.is_empty() {
        "completed"
    } else {
        "completed with errors"
    };
    let duration = (summary.finished_at - summary.started_at)
        .num_seconds()
        .max(0) as u64;

    let mut lines = vec![
        "Playlist Archiver Summary".to_string(),
        format!("Run: {} ({})", summary.run_id, summary.trigger.as_str()),
        format!("Status: {status}"),
        format!("Success: {}", summary.successes.len()),
        format!("Failed: {}", summary.failures.len()),
        format!("Duration: {}", format_duration(duration)),
    ];

    push_section(&mut lines, "Downloaded:", &summary.successes, limit);
    push_section(&mut lines, "Failed:", &summary.failures, limit);

    lines.join("\n")
}

/// Plain-text run summary, shortened until it fits [`MAX_MESSAGE_LEN`]
pub fn format_summary(summary: &RunSummary) -> String {
    let mut limit = MAX_LISTED_ITEMS;
    let mut message = build_message(summary, limit);
    while message.len() > MAX_MESSAGE_LEN && limit > 0 {
        limit -= 1;
        message = build_message(summary, limit);
    }
    if limit < MAX_LISTED_ITEMS {
        tracing::debug!(limit, "run summary truncated to fit message limit");
    }
    message
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
