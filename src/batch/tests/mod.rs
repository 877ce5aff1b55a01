use super::*;
use crate::test_helpers::{HarnessOptions, MemoryHistory, TestHarness, item};
use crate::types::Event;
use std::path::PathBuf;

fn ids(outcomes: &[ItemOutcome]) -> Vec<&str> {
    outcomes.iter().map(|o| o.item_id.as_str()).collect()
}

#[tokio::test]
async fn test_full_mode_runs_items_in_order_and_records_failures() {
    let mut h = TestHarness::build(HarnessOptions {
        failures: &[("v2", ErrorKind::Network)],
        ..HarnessOptions::default()
    });
    h.query.set("P", &["v1", "v2", "v3"]);
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v1", "v3"]);
    assert_eq!(ids(&summary.failures), vec!["v2"]);
    assert_eq!(summary.failures[0].error_kind, Some(ErrorKind::Network));
    assert_eq!(summary.sources[0].downloaded, 2);
    assert_eq!(summary.sources[0].failed, 1);

    // v1 and v3 succeed natively; v2 runs native plus a two-step ladder
    assert_eq!(h.calls(), vec!["v1", "v2", "v2", "v2", "v3"]);

    let status = h.registry.status();
    assert_eq!(status.phase, RunPhase::Idle);
    assert!(status.finished_at.is_some());
    assert!(h.registry.is_idle());

    {
        let runs = h.history.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(ids(&runs[0].successes), vec!["v1", "v3"]);
    }
    assert_eq!(h.history.markers.lock().unwrap()[0].run_id, summary.run_id);

    let events = h.drain_events();
    let phases: Vec<RunPhase> = events
        .iter()
        .filter_map(|e| match e {
            Event::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![RunPhase::Downloading, RunPhase::Finalizing]);
    assert!(matches!(events.last(), Some(Event::RunFinished { successes: 2, failures: 1, .. })));
}

#[tokio::test]
async fn test_cancellation_marks_remaining_items_cancelled() {
    let h = TestHarness::build(HarnessOptions {
        cancel_after: Some("v2"),
        ..HarnessOptions::default()
    });
    h.query.set("P", &["v1", "v2", "v3", "v4", "v5"]);
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    // The in-flight item completes; the rest are never attempted
    assert_eq!(ids(&summary.successes), vec!["v1", "v2"]);
    assert_eq!(ids(&summary.failures), vec!["v3", "v4", "v5"]);
    assert!(summary
        .failures
        .iter()
        .all(|o| o.error_kind == Some(ErrorKind::Cancelled)));
    assert!(summary.cancelled);
    assert_eq!(h.calls(), vec!["v1", "v2"]);

    let status = h.registry.status();
    assert!(status.cancel_requested);
    assert_eq!(status.phase, RunPhase::Idle);
    assert_eq!(status.successes.len() + status.failures.len(), 5);
}

#[tokio::test]
async fn test_cancellation_skips_unlisted_sources_but_accounts_prelisted_items() {
    let h = TestHarness::build(HarnessOptions {
        cancel_after: Some("a1"),
        ..HarnessOptions::default()
    });
    h.query.set("A", &["a1"]);
    h.query.set("B", &["b1"]);
    let a = h.source("A", SourceMode::Full);
    let b = h.source("B", SourceMode::Full);
    let c = h.source("C", SourceMode::Full);

    let summary = h
        .runner
        .run(
            RunTrigger::Manual,
            vec![
                WorkUnit::new(a),
                WorkUnit::new(b),
                WorkUnit::with_items(c, vec![item("c1"), item("c2")]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["a1"]);
    assert_eq!(ids(&summary.failures), vec!["c1", "c2"]);
    assert_eq!(summary.sources.len(), 3);
    assert_eq!(summary.sources[1].failed, 0);
}

#[tokio::test]
async fn test_first_subscribe_run_records_all_and_downloads_nothing() {
    let h = TestHarness::new();
    h.query.set("S", &["v1", "v2", "v3"]);
    let source = h.source("S", SourceMode::Subscribe);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source.clone())])
        .await
        .unwrap();

    assert!(summary.successes.is_empty());
    assert!(summary.failures.is_empty());
    assert!(h.calls().is_empty());

    let state = h.watch_store.get("S").await.unwrap();
    assert!(state.initialized);
    assert_eq!(state.last_seen_item_ids.len(), 3);
    assert_eq!(state.last_item_count, Some(3));

    // Second run only downloads what is new
    h.query.set("S", &["v1", "v2", "v3", "v4"]);
    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v4"]);
    assert_eq!(h.calls(), vec!["v4"]);
    assert!(h.watch_store.get("S").await.unwrap().last_seen_item_ids.contains("v4"));
}

#[tokio::test]
async fn test_subscribe_failures_are_not_marked_seen() {
    let h = TestHarness::build(HarnessOptions {
        failures: &[("v5", ErrorKind::UnsupportedFormat)],
        ..HarnessOptions::default()
    });
    h.watch_store
        .modify("S", |state| {
            state.initialized = true;
            state.last_seen_item_ids.insert("v1".into());
        })
        .await;
    h.query.set("S", &["v1", "v4", "v5"]);
    let source = h.source("S", SourceMode::Subscribe);

    let summary = h
        .runner
        .run(RunTrigger::Watcher, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v4"]);
    assert_eq!(ids(&summary.failures), vec!["v5"]);

    let seen = h.watch_store.get("S").await.unwrap().last_seen_item_ids;
    assert!(seen.contains("v4"));
    assert!(!seen.contains("v5"));
}

#[tokio::test]
async fn test_full_mode_skips_items_already_in_history() {
    let h = TestHarness::new();
    h.query.set("P", &["v1", "v2"]);
    let source = h.source("P", SourceMode::Full);

    h.runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source.clone())])
        .await
        .unwrap();
    h.query.set("P", &["v1", "v2", "v3"]);
    let summary = h
        .runner
        .run(RunTrigger::Scheduled, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v3"]);
    assert_eq!(h.calls(), vec!["v1", "v2", "v3"]);
}

#[tokio::test]
async fn test_zero_item_run_still_cycles_through_phases() {
    let mut h = TestHarness::new();
    h.query.set("P", &[]);
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert!(summary.successes.is_empty() && summary.failures.is_empty());
    assert_eq!(h.history.runs.lock().unwrap().len(), 1);

    let events = h.drain_events();
    assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PhaseChanged { phase: RunPhase::Downloading, .. })));
    assert!(matches!(events.last(), Some(Event::RunFinished { successes: 0, failures: 0, .. })));
    assert!(h.registry.is_idle());
}

#[tokio::test]
async fn test_listing_failure_records_source_failure_and_continues() {
    let h = TestHarness::new();
    h.query.break_source("BAD");
    h.query.set("OK", &["v1"]);
    let bad = h.source("BAD", SourceMode::Full);
    let ok = h.source("OK", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(bad), WorkUnit::new(ok)])
        .await
        .unwrap();

    assert_eq!(ids(&summary.failures), vec!["BAD"]);
    assert_eq!(summary.failures[0].error_kind, Some(ErrorKind::Network));
    assert_eq!(ids(&summary.successes), vec!["v1"]);
    assert!(summary.last_error.unwrap().starts_with("BAD [network]"));
}

#[tokio::test]
async fn test_history_failure_is_recorded_as_last_error() {
    let history = MemoryHistory {
        fail_record: true,
        ..MemoryHistory::default()
    };
    let h = TestHarness::build(HarnessOptions {
        history,
        ..HarnessOptions::default()
    });
    h.query.set("P", &["v1"]);
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Manual, vec![WorkUnit::new(source)])
        .await
        .unwrap();

    assert_eq!(summary.successes.len(), 1);
    assert!(summary.last_error.as_deref().unwrap().contains("history not recorded"));
    assert!(h.registry.status().last_error.unwrap().contains("history not recorded"));
    assert!(h.registry.is_idle());
}

#[tokio::test]
async fn test_second_run_while_busy_is_rejected() {
    let h = TestHarness::new();
    let source = h.source("P", SourceMode::Full);
    let guard = h
        .runner
        .start(RunTrigger::Manual, &[WorkUnit::new(source.clone())])
        .unwrap();

    let busy = h
        .runner
        .run(RunTrigger::Watcher, vec![WorkUnit::new(source.clone())])
        .await
        .unwrap_err();
    assert_eq!(busy.run_id, guard.run_id());

    h.runner.execute(guard, vec![WorkUnit::new(source)]).await;
    assert!(h.registry.is_idle());
}

#[tokio::test]
async fn test_duplicate_listing_entries_resolve_once() {
    let h = TestHarness::new();
    let source = h.source("P", SourceMode::Full);
    let summary = h
        .runner
        .run(
            RunTrigger::Manual,
            vec![WorkUnit::with_items(source, vec![item("v1"), item("v1"), item("v2")])],
        )
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v1", "v2"]);
    assert_eq!(h.calls(), vec!["v1", "v2"]);
    let paths: Vec<PathBuf> = summary
        .successes
        .iter()
        .filter_map(|o| o.output_path.clone())
        .collect();
    assert!(paths.iter().all(|p| p.exists()));
}

#[tokio::test]
async fn test_detected_items_merge_into_listing() {
    let h = TestHarness::new();
    // v3 was detected by a poll but has dropped out of the current listing
    h.query.set("P", &["v1", "v2"]);
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(
            RunTrigger::Watcher,
            vec![WorkUnit::with_detected(source, vec![item("v2"), item("v3")])],
        )
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v1", "v2", "v3"]);
    assert_eq!(h.query.queried(), vec!["P"]);
}

#[tokio::test]
async fn test_listing_failure_falls_back_to_detected_items() {
    let h = TestHarness::new();
    h.query.break_source("P");
    let source = h.source("P", SourceMode::Full);

    let summary = h
        .runner
        .run(RunTrigger::Watcher, vec![WorkUnit::with_detected(source, vec![item("v9")])])
        .await
        .unwrap();

    assert_eq!(ids(&summary.successes), vec!["v9"]);
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn test_explicit_unit_ignores_history() {
    let h = TestHarness::new();
    let source = h.source("single", SourceMode::Full);

    for _ in 0..2 {
        let summary = h
            .runner
            .run(
                RunTrigger::Manual,
                vec![WorkUnit::explicit(source.clone(), vec![item("v1")])],
            )
            .await
            .unwrap();
        assert_eq!(ids(&summary.successes), vec!["v1"]);
    }
    assert_eq!(h.calls(), vec!["v1", "v1"]);
    assert!(h.query.queried().is_empty());
}
