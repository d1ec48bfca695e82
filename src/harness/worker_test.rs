//! Tests for the request worker pool against in-process targets

use super::*;
use crate::platform::mock::{closed_port_url, spawn_local_service};
use crate::service::CONTENT_BODY;
use reqwest::Url;
use std::time::Duration;

/// Run a pool against `target` for `duration`, then stop it
async fn run_pool_for(
    workers: usize,
    target: &Url,
    settings: &RequestSettings,
    duration: Duration,
) -> (PoolSummary, OutcomeCounter) {
    let client = build_client().unwrap();
    let counter = OutcomeCounter::new();
    let (completion, signal) = completion_channel();

    let pool =
        RequestWorkerPool::start(workers, target, settings, &client, &counter, &signal).unwrap();
    tokio::time::sleep(duration).await;
    completion.set();

    let summary = tokio::time::timeout(Duration::from_secs(5), pool.join())
        .await
        .expect("workers should stop once completion is set")
        .unwrap();
    (summary, counter)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_healthy_target_records_only_success() {
    // ARRANGE
    let service = spawn_local_service().await;
    let settings = RequestSettings {
        expected_body: Some(CONTENT_BODY.trim_end().to_string()),
        ..RequestSettings::default()
    };

    // ACT
    let (summary, counter) =
        run_pool_for(4, &service.url, &settings, Duration::from_millis(200)).await;

    // ASSERT
    let snapshot = counter.snapshot();
    assert_eq!(summary.workers, 4);
    assert!(summary.attempts > 0, "workers should have sent requests");
    assert_eq!(snapshot.kinds(), 1, "unexpected outcomes: {snapshot}");
    assert_eq!(snapshot.count(Outcome::Status(200)), summary.attempts);
    assert_eq!(snapshot.total(), summary.attempts);
}

#[tokio::test]
async fn test_unknown_path_is_recorded_as_status() {
    let service = spawn_local_service().await;
    let settings = RequestSettings {
        path: "/contetn".to_string(),
        ..RequestSettings::default()
    };

    let (summary, counter) =
        run_pool_for(2, &service.url, &settings, Duration::from_millis(100)).await;

    let snapshot = counter.snapshot();
    assert!(summary.attempts > 0);
    assert_eq!(snapshot.count(Outcome::Status(404)), summary.attempts);
}

#[tokio::test]
async fn test_refused_connections_are_transport_errors() {
    let target = closed_port_url().await;

    let (summary, counter) = run_pool_for(
        3,
        &target,
        &RequestSettings::default(),
        Duration::from_millis(100),
    )
    .await;

    let snapshot = counter.snapshot();
    assert!(summary.attempts > 0);
    assert_eq!(snapshot.kinds(), 1, "unexpected outcomes: {snapshot}");
    assert_eq!(snapshot.count(Outcome::TransportError), summary.attempts);
}

#[tokio::test]
async fn test_silent_target_times_out_as_transport_error() {
    // ARRANGE - accept connections but never answer
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    let target = Url::parse(&format!("http://{addr}/")).unwrap();
    let settings = RequestSettings {
        response_timeout: Duration::from_millis(50),
        ..RequestSettings::default()
    };

    // ACT
    let (summary, counter) = run_pool_for(2, &target, &settings, Duration::from_millis(200)).await;

    // ASSERT
    let snapshot = counter.snapshot();
    assert!(summary.attempts > 0);
    assert_eq!(snapshot.count(Outcome::TransportError), summary.attempts);
    acceptor.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_increments_after_join() {
    let service = spawn_local_service().await;

    let (summary, counter) = run_pool_for(
        4,
        &service.url,
        &RequestSettings::default(),
        Duration::from_millis(100),
    )
    .await;
    let at_join = counter.snapshot();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(at_join.total(), summary.attempts);
    assert_eq!(counter.snapshot(), at_join, "counter changed after join");
}

#[tokio::test]
async fn test_zero_workers_join_immediately() {
    let service = spawn_local_service().await;

    let (summary, counter) = run_pool_for(
        0,
        &service.url,
        &RequestSettings::default(),
        Duration::from_millis(10),
    )
    .await;

    assert_eq!(
        summary,
        PoolSummary {
            workers: 0,
            attempts: 0
        }
    );
    assert_eq!(counter.snapshot().total(), 0);
}

#[tokio::test]
async fn test_workers_stop_when_completion_already_set() {
    let service = spawn_local_service().await;
    let client = build_client().unwrap();
    let counter = OutcomeCounter::new();
    let (completion, signal) = completion_channel();
    completion.set();

    let pool = RequestWorkerPool::start(
        3,
        &service.url,
        &RequestSettings::default(),
        &client,
        &counter,
        &signal,
    )
    .unwrap();
    let summary = pool.join().await.unwrap();

    assert_eq!(summary.attempts, 0);
    assert_eq!(counter.snapshot().total(), 0);
}

#[test]
fn test_request_url_joins_path() {
    let base = Url::parse("http://10.0.0.7:80/").unwrap();

    let url = RequestSettings::default().request_url(&base).unwrap();

    assert_eq!(url.as_str(), "http://10.0.0.7/content");
}

#[test]
fn test_request_url_rejects_unjoinable_base() {
    let base = Url::parse("mailto:ops@example.com").unwrap();

    let result = RequestSettings::default().request_url(&base);

    assert!(matches!(result, Err(HarnessError::InvalidTarget { .. })));
}
