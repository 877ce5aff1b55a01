use super::*;
use crate::registry::RunSpec;
use crate::test_helpers::{
    ArchiverFixture, FakeExtractor, archiver_config, archiver_fixture, archiver_fixture_with,
};
use crate::types::{ErrorKind, RunTrigger};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn app(f: &ArchiverFixture) -> Router {
    create_router(f.archiver.clone(), &ApiConfig::default())
}

async fn send(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, Body::empty()).await
}

async fn post(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    send(app, "POST", uri, Body::from(body.to_string())).await
}

fn hold_gate(f: &ArchiverFixture) -> crate::registry::RunGuard {
    f.archiver
        .registry
        .start(RunSpec {
            trigger: RunTrigger::Scheduled,
            sources: vec!["PL1".into()],
        })
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = get(app(&f), "/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["run_active"], false);
}

#[tokio::test]
async fn test_routes_live_under_api_v1() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, _) = get(app(&f), "/health").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_enabled() {
    let f = archiver_fixture(&["PL1"]).await;
    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app(&f).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let f = archiver_fixture(&["PL1"]).await;
    let api = ApiConfig {
        api_key: Some("s3cret".into()),
        ..ApiConfig::default()
    };

    let router = create_router(f.archiver.clone(), &api);
    let (status, body) = get(router.clone(), "/api/v1/status").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let request = Request::builder()
        .uri("/api/v1/status")
        .header("Authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_start_run_returns_accepted_with_run_id() {
    let f = archiver_fixture(&["PL1", "PL2"]).await;
    f.query.set("PL1", &["a"]);
    f.query.set("PL2", &["b"]);

    let (status, body) = post(app(&f), "/api/v1/runs", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["run_id"].as_i64().unwrap();

    f.archiver.wait_idle().await;
    let (status, body) = get(app(&f), "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_id"], run_id);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["successes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_start_run_with_selected_sources() {
    let f = archiver_fixture(&["PL1", "PL2"]).await;
    f.query.set("PL1", &["a"]);
    f.query.set("PL2", &["b"]);

    let (status, _) = post(app(&f), "/api/v1/runs", r#"{"sources": ["PL2"]}"#).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    f.archiver.wait_idle().await;

    assert_eq!(f.query.queried(), vec!["PL2"]);
    assert_eq!(f.extractor.calls(), vec!["b"]);
}

#[tokio::test]
async fn test_start_run_while_active_conflicts() {
    let f = archiver_fixture(&["PL1"]).await;
    let guard = hold_gate(&f);

    let (status, body) = post(app(&f), "/api/v1/runs", "").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "run_in_progress");
    assert_eq!(body["error"]["details"]["run_id"], guard.run_id().0);

    // The rejected request queued nothing
    guard.finish();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.query.queried().is_empty());
}

#[tokio::test]
async fn test_start_run_unknown_source_is_not_found() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = post(app(&f), "/api/v1/runs", r#"{"sources": ["nope"]}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_start_run_rejects_malformed_body() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = post(app(&f), "/api/v1/runs", "{ nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_cancel_when_idle_is_noop() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = post(app(&f), "/api/v1/runs/cancel", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_cancel_active_run_is_accepted() {
    let f = archiver_fixture(&["PL1"]).await;
    let guard = hold_gate(&f);

    let (status, body) = post(app(&f), "/api/v1/runs/cancel", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["run_id"], guard.run_id().0);
    assert!(guard.is_cancelled());
    guard.finish();
}

#[tokio::test]
async fn test_history_filters_and_pagination() {
    let root = TempDir::new().unwrap();
    let config = archiver_config(root.path(), &["PL1", "PL2"]);
    let mut extractor = FakeExtractor::default();
    extractor.failures.insert("c".into(), ErrorKind::Disk);
    let f = archiver_fixture_with(root, config, extractor).await;
    f.query.set("PL1", &["a", "b"]);
    f.query.set("PL2", &["c"]);

    f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;

    let (status, body) = get(app(&f), "/api/v1/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);

    let (_, body) = get(app(&f), "/api/v1/history?source=PL1&limit=1").await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["limit"], 1);

    let (_, body) = get(app(&f), "/api/v1/history?success=false").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["item_id"], "c");

    let (_, body) = get(app(&f), "/api/v1/history?since=2000-01-01T00:00:00Z&until=2000-01-02T00:00:00Z").await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_history_rejects_inverted_range() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = get(
        app(&f),
        "/api/v1/history?since=2025-01-02T00:00:00Z&until=2025-01-01T00:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_runs_lists_recorded_runs() {
    let f = archiver_fixture(&["PL1"]).await;
    f.query.set("PL1", &["a"]);
    let run_id = f.archiver.start_run(RunTrigger::Manual, None).unwrap();
    f.archiver.wait_idle().await;

    let (status, body) = get(app(&f), "/api/v1/runs").await;
    assert_eq!(status, StatusCode::OK);
    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["run_id"], run_id.0);
    assert_eq!(runs[0]["trigger"], "manual");
    assert_eq!(runs[0]["success_count"], 1);
}

#[tokio::test]
async fn test_watcher_endpoint_reports_disabled_before_start() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = get(app(&f), "/api/v1/watcher").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["phase"], "disabled");
    assert!(body["sources"].is_array());
}

#[tokio::test]
async fn test_schedule_endpoint() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = get(app(&f), "/api/v1/schedule").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert!(body["next_run"].is_null());
}

#[tokio::test]
async fn test_events_endpoint_streams_sse() {
    let f = archiver_fixture(&["PL1"]).await;
    let request = Request::builder()
        .uri("/api/v1/events")
        .body(Body::empty())
        .unwrap();
    let response = app(&f).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_api_server_stops_on_shutdown() {
    let root = TempDir::new().unwrap();
    let mut config = archiver_config(root.path(), &["PL1"]);
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let f = archiver_fixture_with(root, config, FakeExtractor::default()).await;

    let handle = f.archiver.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    f.archiver.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_start_single_url_run() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = post(
        app(&f),
        "/api/v1/runs",
        r#"{"single_url": "https://youtu.be/xyz789", "destination": "clips"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["run_id"].is_i64());

    f.archiver.wait_idle().await;
    assert_eq!(f.extractor.calls(), vec!["xyz789"]);
    assert!(f.query.queried().is_empty());

    let (_, body) = get(app(&f), "/api/v1/history?source=single").await;
    assert_eq!(body["total"], 1);
    let items = body["items"].as_array().unwrap();
    let output = items[0]["output_path"].as_str().unwrap();
    assert!(std::path::Path::new(output).starts_with(f._root.path().join("downloads/single/clips")));
}

#[tokio::test]
async fn test_start_single_url_run_rejects_bad_requests() {
    let f = archiver_fixture(&["PL1"]).await;
    let cases = [
        r#"{"single_url": "https://youtu.be/xyz789", "destination": "../outside"}"#,
        r#"{"single_url": "not a url"}"#,
        r#"{"single_url": "https://youtu.be/xyz789", "sources": ["PL1"]}"#,
        r#"{"final_format_override": "mp4"}"#,
    ];
    for case in cases {
        let (status, body) = post(app(&f), "/api/v1/runs", case).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
        assert!(body["error"]["code"].is_string());
    }
    assert!(f.extractor.calls().is_empty());
}

#[tokio::test]
async fn test_update_schedule_endpoint() {
    let f = archiver_fixture(&["PL1"]).await;
    let (status, body) = send(
        app(&f),
        "PUT",
        "/api/v1/schedule",
        Body::from(r#"{"interval_hours": 3, "run_on_startup": true}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interval_hours"], 3);
    assert_eq!(body["run_on_startup"], true);
    assert_eq!(body["enabled"], false);

    let (_, body) = get(app(&f), "/api/v1/schedule").await;
    assert_eq!(body["interval_hours"], 3);

    let (status, body) = send(
        app(&f),
        "PUT",
        "/api/v1/schedule",
        Body::from(r#"{"interval_hours": 0}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "config_error");
    assert_eq!(f.archiver.get_config().schedule.interval_hours, 3);
}
