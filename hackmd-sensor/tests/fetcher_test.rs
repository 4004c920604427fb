mod common;

use common::init_tracing;
use hackmd_sensor::{FetchScope, Fetcher, IngestionPipeline, NoteSource, SensorConfig, SensorError};
use interfaces::{ChannelSink, EventType};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_test::assert_ok;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BACKOFF_BASE: f64 = 0.05;

fn config_for(server: &MockServer) -> SensorConfig {
    let mut config = SensorConfig::new("test-token");
    config.api_base_url = format!("{}/v1", server.uri());
    config.backoff_base_seconds = BACKOFF_BASE;
    config.backoff_max_seconds = 1.0;
    config.request_timeout_seconds = 5;
    config.validate().unwrap()
}

fn fetcher_for(server: &MockServer) -> Fetcher {
    Fetcher::new(&config_for(server)).unwrap()
}

#[tokio::test]
async fn account_listing_fills_in_missing_bodies() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes"))
        .and(query_param("limit", "100"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "n1", "title": "Listed only", "lastChangedAt": 100 },
            { "id": "n2", "title": "Inline body", "content": "inline", "lastChangedAt": 200 }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "n1", "title": "Listed only", "content": "full body", "lastChangedAt": 100
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let notes = assert_ok!(fetcher_for(&server).list_documents(&FetchScope::Account, 100).await);

    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].id(), Some("n1"));
    assert_eq!(notes[0].get("content"), Some(&json!("full body")));
    assert_eq!(notes[1].get("content"), Some(&json!("inline")));
}

#[tokio::test]
async fn workspace_scope_lists_team_notes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/teams/team-a/notes"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "n1", "content": "x", "teamPath": "team-a" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let notes = assert_ok!(
        fetcher_for(&server)
            .list_documents(&FetchScope::Workspace("team-a".to_string()), 10)
            .await
    );
    assert_eq!(notes.len(), 1);
}

#[tokio::test]
async fn listing_is_truncated_to_the_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "n1", "content": "a" },
            "not a note",
            { "id": "n2", "content": "b" },
            { "id": "n3", "content": "c" }
        ])))
        .mount(&server)
        .await;

    let notes = assert_ok!(fetcher_for(&server).list_documents(&FetchScope::Account, 3).await);
    let ids: Vec<_> = notes.iter().filter_map(|n| n.id()).collect();
    assert_eq!(ids, vec!["n1", "n2"]);
}

#[tokio::test]
async fn allowlist_skips_unreachable_notes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "good", "content": "hello", "lastChangedAt": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let scope = FetchScope::Notes(vec!["good".to_string(), "missing".to_string()]);
    let notes = assert_ok!(fetcher_for(&server).list_documents(&scope, 100).await);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id(), Some("good"));
}

#[tokio::test]
async fn failed_body_fetch_leaves_note_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "n1", "lastChangedAt": 1 }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let notes = assert_ok!(fetcher_for(&server).list_documents(&FetchScope::Account, 100).await);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].get("content"), Some(&json!("")));
}

#[tokio::test]
async fn rate_limited_request_is_retried_with_backoff() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "n1", "content": "made it", "lastChangedAt": 100
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let started = Instant::now();
    let note = assert_ok!(fetcher.get_document("n1").await);
    let elapsed = started.elapsed();

    assert_eq!(note.get("content"), Some(&json!("made it")));
    // Two waits of base and 2*base, each scaled by at least 0.5
    let floor = Duration::from_secs_f64(0.5 * BACKOFF_BASE * 3.0);
    assert!(
        elapsed + Duration::from_millis(1) >= floor,
        "retries finished in {:?}, expected at least {:?}",
        elapsed,
        floor
    );
}

#[tokio::test]
async fn timed_out_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "n1", "content": "too late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "n1", "content": "on time" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.request_timeout_seconds = 1;
    let fetcher = Fetcher::new(&config).unwrap();

    let note = assert_ok!(fetcher.get_document("n1").await);
    assert_eq!(note.get("content"), Some(&json!("on time")));
}

#[tokio::test]
async fn allowlist_listing_runs_on_a_spawned_task() {
    let server = MockServer::start().await;

    for id in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/notes/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id, "content": id })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let fetcher = fetcher_for(&server);
    let scope = FetchScope::Notes(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    let notes = tokio::spawn(async move { fetcher.list_documents(&scope, 2).await })
        .await
        .unwrap()
        .unwrap();

    let ids: Vec<_> = notes.iter().filter_map(|n| n.id()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn retries_stop_after_the_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.retries = 2;
    let fetcher = Fetcher::new(&config).unwrap();
    assert_eq!(fetcher.retry_policy().max_attempts(), 3);

    match fetcher.get_document("n1").await {
        Err(SensorError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {:?}", other),
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes/n1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    match fetcher_for(&server).get_document("n1").await {
        Err(SensorError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected a 404, got {:?}", other),
    }
}

#[tokio::test]
async fn non_list_response_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "nope" })))
        .mount(&server)
        .await;

    let result = fetcher_for(&server).list_documents(&FetchScope::Account, 100).await;
    assert!(matches!(result, Err(SensorError::Validation(_))));
}

#[tokio::test]
async fn configured_pipeline_emits_from_the_api() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "n1", "title": "Roadmap", "content": "# Q3", "lastChangedAt": 100, "ownerPath": "alice" }
        ])))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.state_path = dir.path().join("hackmd_state.json");
    let (sink, mut events) = ChannelSink::new();
    let pipeline = IngestionPipeline::from_config(&config, Arc::new(sink)).await.unwrap();

    let report = assert_ok!(pipeline.poll_once().await);
    assert_eq!(report.new, 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::New);
    assert_eq!(event.rid.reference(), "orn:hackmd.note:n1");
    assert_eq!(event.contents["title"], "Roadmap");
    assert_eq!(event.contents["userPath"], "alice");
    assert!(config.state_path.exists());
}
