use super::*;
use crate::db::{ActiveRunMarker, HistoryFilter};
use crate::registry::CancelOutcome;
use crate::test_helpers::{
    FakeExtractor, archiver_config as test_config, archiver_fixture as fixture,
    archiver_fixture_with as fixture_with, source_config,
};
use crate::config::ScheduleUpdate;
use crate::types::{ErrorKind, RunId, RunTrigger, SINGLE_SOURCE_ID, SingleDownload, SourceMode};
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_manual_run_downloads_and_records_history() {
    let f = fixture(&["PL1", "PL2"]).await;
    f.query.set("PL1", &["a", "b"]);
    f.query.set("PL2", &["c"]);

    let run_id = f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;

    let status = f.archiver.status();
    assert_eq!(status.run_id, Some(run_id));
    assert_eq!(status.successes.len(), 3);
    assert_eq!(f.extractor.calls(), vec!["a", "b", "c"]);

    let history = f
        .archiver
        .history(&HistoryFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|entry| entry.run_id == run_id && entry.success));

    let runs = f.archiver.runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, run_id.0);
    assert!(f.archiver.db.get_active_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_start_while_active_is_busy() {
    let f = fixture(&["PL1"]).await;
    f.query.set("PL1", &["a"]);

    let first = f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    match f.archiver.start_run(RunTrigger::Manual, None) {
        Err(Error::Busy(busy)) => assert_eq!(busy.run_id, first),
        other => panic!("expected Busy, got {other:?}"),
    }

    f.archiver.wait_idle().await;
    assert_eq!(f.extractor.calls(), vec!["a"]);
}

#[tokio::test]
async fn test_start_run_selects_sources_in_requested_order() {
    let f = fixture(&["PL1", "PL2"]).await;
    f.query.set("PL1", &["a"]);
    f.query.set("PL2", &["b"]);

    f.archiver
        .start_run(RunTrigger::Manual, Some(&["PL2".to_string(), "PL1".to_string()]))
        .unwrap();
    f.archiver.wait_idle().await;
    assert_eq!(f.query.queried(), vec!["PL2", "PL1"]);

    let missing = f
        .archiver
        .start_run(RunTrigger::Manual, Some(&["nope".to_string()]));
    assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_full_mode_skips_items_already_in_history() {
    let f = fixture(&["PL1"]).await;
    f.query.set("PL1", &["a", "b"]);
    f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;

    f.query.set("PL1", &["a", "b", "c"]);
    f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;

    assert_eq!(f.extractor.calls(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failed_items_are_retried_next_run() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path(), &["PL1"]);
    let extractor = FakeExtractor {
        failures: [("b".to_string(), ErrorKind::UnsupportedFormat)].into(),
        ..FakeExtractor::default()
    };
    let f = fixture_with(root, config, extractor).await;
    f.query.set("PL1", &["a", "b"]);

    f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;
    let status = f.archiver.status();
    assert_eq!(status.failures.len(), 1);
    assert_eq!(status.failures[0].error_kind, Some(ErrorKind::UnsupportedFormat));
    let first_run_calls = f.extractor.calls().len();

    // Only the failed item is attempted again
    f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;
    let retried = f.extractor.calls().split_off(first_run_calls);
    assert!(!retried.is_empty());
    assert!(retried.iter().all(|id| id == "b"));
}

#[tokio::test]
async fn test_cancel_without_run_is_noop() {
    let f = fixture(&["PL1"]).await;
    assert_eq!(f.archiver.cancel(), CancelOutcome::NoOp);
}

#[tokio::test]
async fn test_stale_run_is_recorded_as_interrupted() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path(), &["PL1"]);

    let db = Database::new(&config.persistence.database_path).await.unwrap();
    db.set_active_run(&ActiveRunMarker {
        run_id: RunId(7),
        trigger: RunTrigger::Watcher,
        started_at: chrono::Utc::now(),
    })
    .await
    .unwrap();
    db.close().await;

    let f = fixture_with(root, config, FakeExtractor::default()).await;
    let runs = f.archiver.runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, 7);
    assert_eq!(runs[0].interrupted, 1);
    assert!(f.archiver.db.get_active_run().await.unwrap().is_none());

    f.query.set("PL1", &["a"]);
    let next = f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    assert_eq!(next, RunId(8));
    f.archiver.wait_idle().await;
}

#[tokio::test]
async fn test_apply_config_updates_settings_and_keeps_watch_state() {
    let f = fixture(&["PL1", "PL2"]).await;
    f.archiver
        .watch_store
        .record_seen("PL1", &["a".to_string()])
        .await;
    f.archiver
        .watch_store
        .record_seen("PL2", &["b".to_string()])
        .await;

    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path(), &["PL1"]);
    config.watch_policy.enabled = true;
    config.watch_policy.min_interval_minutes = 10;
    f.archiver.apply_config(config).await.unwrap();

    let watch = f.archiver.settings.watch.borrow().clone();
    assert!(watch.policy.enabled);
    assert_eq!(watch.sources.len(), 1);
    assert_eq!(f.archiver.settings.schedule.borrow().sources.len(), 1);

    let states = f.archiver.watch_states().await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].source_id, "PL1");
    assert!(states[0].last_seen_item_ids.contains("a"));
    assert_eq!(states[0].current_poll_interval, Duration::from_secs(600));
    assert_eq!(f.archiver.get_config().sources.len(), 1);
}

#[tokio::test]
async fn test_apply_config_rejects_invalid_config() {
    let f = fixture(&["PL1"]).await;
    let mut config = f.archiver.get_config();
    config.watch_policy.idle_backoff_factor = 0;
    config.sources.push(source_config("PL2", SourceMode::Subscribe));

    assert!(matches!(
        f.archiver.apply_config(config).await,
        Err(Error::Config { .. })
    ));
    assert_eq!(f.archiver.get_config().sources.len(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_services_and_refuses_runs() {
    let f = fixture(&["PL1"]).await;
    f.archiver.start_services(None).unwrap();
    assert_eq!(
        f.archiver.watcher_status().phase,
        crate::watcher::WatcherPhase::Disabled
    );

    let mut events = f.archiver.subscribe();
    f.archiver.shutdown().await.unwrap();

    assert!(matches!(
        f.archiver.start_run(RunTrigger::Manual, None),
        Err(Error::ShuttingDown)
    ));
    assert!(!f.archiver.db.was_unclean_shutdown().await.unwrap());
    loop {
        if let Event::Shutdown = events.recv().await.unwrap() {
            break;
        }
    }
}

#[tokio::test]
async fn test_schedule_times_fall_back_to_database() {
    let f = fixture(&["PL1"]).await;
    let next = chrono::Utc::now() + chrono::Duration::hours(3);
    f.archiver
        .db
        .set_schedule_times(&ScheduleTimes {
            last_run: None,
            next_run: Some(next),
        })
        .await
        .unwrap();

    let times = f.archiver.schedule_times().await.unwrap();
    assert_eq!(
        times.next_run.map(|t| t.timestamp()),
        Some(next.timestamp())
    );
}

#[tokio::test]
async fn test_single_url_run_downloads_into_single_dir() {
    let f = fixture(&["PL1"]).await;
    let request = SingleDownload {
        url: "https://www.youtube.com/watch?v=abc123".to_string(),
        destination: Some("talks/2024".into()),
        ..SingleDownload::default()
    };

    let run_id = f.archiver.start_single(&request).unwrap();
    f.archiver.wait_idle().await;

    assert_eq!(f.extractor.calls(), vec!["abc123"]);
    assert!(f.query.queried().is_empty());

    let history = f
        .archiver
        .history(&HistoryFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run_id, run_id);
    assert_eq!(history[0].source_id, SINGLE_SOURCE_ID);
    let output = history[0].output_path.clone().unwrap();
    assert!(output.starts_with(f._root.path().join("downloads/single/talks/2024")));
    assert!(output.exists());

    // Explicit URLs download again even when already in history
    f.archiver.start_single(&request).unwrap();
    f.archiver.wait_idle().await;
    assert_eq!(f.extractor.calls(), vec!["abc123", "abc123"]);
}

#[tokio::test]
async fn test_single_url_run_rejects_bad_input() {
    let f = fixture(&["PL1"]).await;

    let escape = SingleDownload {
        url: "https://www.youtube.com/watch?v=abc123".to_string(),
        destination: Some("../../etc".into()),
        ..SingleDownload::default()
    };
    assert!(matches!(
        f.archiver.start_single(&escape),
        Err(Error::Config { key: Some(ref key), .. }) if key == "destination"
    ));

    let not_http = SingleDownload {
        url: "file:///etc/passwd".to_string(),
        ..SingleDownload::default()
    };
    assert!(matches!(
        f.archiver.start_single(&not_http),
        Err(Error::Config { key: Some(ref key), .. }) if key == "url"
    ));
    assert!(f.extractor.calls().is_empty());
    assert!(f.archiver.runs(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_schedule_applies_and_persists() {
    let f = fixture(&["PL1"]).await;
    let path = f._root.path().join("config.json");
    f.archiver.get_config().save(&path).await.unwrap();
    f.archiver.start_config_watcher(path.clone()).unwrap();

    let update = ScheduleUpdate {
        interval_hours: Some(12),
        ..ScheduleUpdate::default()
    };
    let schedule = f.archiver.update_schedule(&update).await.unwrap();
    assert_eq!(schedule.interval_hours, 12);
    assert_eq!(f.archiver.get_config().schedule.interval_hours, 12);

    let saved = Config::load(&path).unwrap();
    assert_eq!(saved.schedule.interval_hours, 12);
    assert_eq!(saved.sources.len(), 1);

    let invalid = ScheduleUpdate {
        interval_hours: Some(0),
        ..ScheduleUpdate::default()
    };
    assert!(matches!(
        f.archiver.update_schedule(&invalid).await,
        Err(Error::Config { .. })
    ));
    assert_eq!(f.archiver.get_config().schedule.interval_hours, 12);
    assert_eq!(Config::load(&path).unwrap().schedule.interval_hours, 12);

    f.archiver.shutdown().await.unwrap();
}
