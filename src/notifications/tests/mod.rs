use super::*;
use crate::config::{TelegramConfig, WebhookConfig};
use crate::error::Error;
use crate::types::{ErrorKind, RunId, RunTrigger};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn outcome(item_id: &str, title: Option<&str>, error_kind: Option<ErrorKind>) -> ItemOutcome {
    ItemOutcome {
        source_id: "PL1".into(),
        item_id: item_id.into(),
        title: title.map(String::from),
        error_kind,
        message: error_kind.map(|k| format!("scripted {k}")),
        output_path: None,
        strategy: None,
        retry_count: 0,
    }
}

fn summary(successes: Vec<ItemOutcome>, failures: Vec<ItemOutcome>) -> RunSummary {
    let finished_at = Utc::now();
    RunSummary {
        run_id: RunId(7),
        trigger: RunTrigger::Watcher,
        started_at: finished_at - ChronoDuration::seconds(125),
        finished_at,
        successes,
        failures,
        sources: Vec::new(),
        cancelled: false,
        last_error: None,
    }
}

fn webhook_config(url: String) -> WebhookConfig {
    WebhookConfig {
        url,
        auth_header: Some("Bearer secret".into()),
        timeout: Duration::from_secs(5),
        skip_empty_runs: true,
    }
}

struct RecordingNotifier {
    name: &'static str,
    fail: bool,
    seen: Mutex<Vec<RunId>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        self.name
    }

    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        self.seen.lock().unwrap().push(summary.run_id);
        if self.fail {
            return Err(Error::Notification {
                notifier: self.name.into(),
                message: "boom".into(),
            });
        }
        Ok(())
    }
}

#[test]
fn test_format_duration() {
    assert_eq!(format_duration(5), "5s");
    assert_eq!(format_duration(125), "2m 5s");
    assert_eq!(format_duration(3723), "1h 2m 3s");
}

#[test]
fn test_format_summary_lists_titles_and_failure_kinds() {
    let message = format_summary(&summary(
        vec![outcome("a", Some("First video"), None)],
        vec![outcome("b", None, Some(ErrorKind::Network))],
    ));

    assert!(message.contains("Status: completed with errors"));
    assert!(message.contains("Success: 1"));
    assert!(message.contains("Duration: 2m 5s"));
    assert!(message.contains("- First video"));
    assert!(message.contains("- b [network]"));
}

#[test]
fn test_format_summary_truncates_long_lists() {
    let long_title = "x".repeat(300);
    let successes: Vec<ItemOutcome> = (0..40)
        .map(|i| outcome(&format!("id{i}"), Some(&long_title), None))
        .collect();

    let message = format_summary(&summary(successes, Vec::new()));
    assert!(message.len() <= MAX_MESSAGE_LEN);
    assert!(message.contains("more)"));
}

#[tokio::test]
async fn test_hub_skips_empty_runs_and_reports_failures() {
    let (tx, mut rx) = broadcast::channel(16);
    let ok = Arc::new(RecordingNotifier {
        name: "ok",
        fail: false,
        seen: Mutex::new(Vec::new()),
    });
    let failing = Arc::new(RecordingNotifier {
        name: "failing",
        fail: true,
        seen: Mutex::new(Vec::new()),
    });
    let hub = NotificationHub::new(tx)
        .with_notifier(ok.clone())
        .with_notifier(failing.clone());
    assert_eq!(hub.len(), 2);

    assert!(hub.dispatch(&summary(Vec::new(), Vec::new())).is_none());

    let handle = hub
        .dispatch(&summary(vec![outcome("a", None, None)], Vec::new()))
        .unwrap();
    handle.await.unwrap();

    assert_eq!(*ok.seen.lock().unwrap(), vec![RunId(7)]);
    assert_eq!(*failing.seen.lock().unwrap(), vec![RunId(7)]);
    match rx.recv().await.unwrap() {
        Event::NotificationFailed { notifier, error } => {
            assert_eq!(notifier, "failing");
            assert!(error.contains("boom"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_telegram_posts_send_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .and(body_partial_json(serde_json::json!({ "chat_id": "42" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new(TelegramConfig {
        bot_token: "TOKEN".into(),
        chat_id: "42".into(),
        api_base: server.uri(),
    })
    .unwrap();

    notifier
        .notify(&summary(vec![outcome("a", None, None)], Vec::new()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_telegram_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new(TelegramConfig {
        bot_token: "BAD".into(),
        chat_id: "42".into(),
        api_base: server.uri(),
    })
    .unwrap();

    let err = notifier
        .notify(&summary(vec![outcome("a", None, None)], Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Notification { .. }));
    assert!(!err.to_string().contains("BAD"));
}

#[tokio::test]
async fn test_webhook_posts_summary_with_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(serde_json::json!({
            "event": "run_finished",
            "summary": { "run_id": 7, "trigger": "watcher" }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(webhook_config(format!("{}/hook", server.uri()))).unwrap();
    notifier
        .notify(&summary(Vec::new(), vec![outcome("b", None, Some(ErrorKind::Disk))]))
        .await
        .unwrap();
}

#[test]
fn test_webhook_empty_run_filter() {
    let mut config = webhook_config("http://localhost/hook".into());
    let empty = summary(Vec::new(), Vec::new());

    let notifier = WebhookNotifier::new(config.clone()).unwrap();
    assert!(!notifier.accepts(&empty));

    config.skip_empty_runs = false;
    let notifier = WebhookNotifier::new(config).unwrap();
    assert!(notifier.accepts(&empty));
}
