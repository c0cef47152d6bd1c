//! Transient server errors are retried; permanent ones are dead-lettered

use crate::common::{http_engine, test_config};
use sumi_harvest::{ErrorKind, JobOutcome, JobSpec, JobStatus, WorkItemState};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page(n: usize) -> String {
    format!("<html><body><h1>Item {}</h1></body></html>", n)
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Items 4, 5 and 6 fail once
    for n in 4..=6 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", n)))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&mock_server)
            .await;
    }
    for n in 0..10 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", n)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page(n))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&mock_server)
            .await;
    }

    let (engine, sink) = http_engine(test_config());
    let urls = (0..10).map(|n| format!("{}/item/{}", base_url, n)).collect();
    let mut spec = JobSpec::new("retries", urls);
    spec.concurrency = 3;

    let job = engine.submit(spec).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.outcome(), JobOutcome::Completed);
    assert_eq!(progress.done, 10);
    assert_eq!(progress.dead_lettered, 0);
    assert_eq!(progress.resume_cursor, 10);
    assert_eq!(sink.items_for(job).len(), 10);

    let items = engine.item_states(job).unwrap();
    for item in &items {
        assert_eq!(item.state, WorkItemState::Done);
        let expected = if (4..=6).contains(&item.position) { 1 } else { 0 };
        assert_eq!(item.retry_count, expected, "item {}", item.position);
    }
    assert_eq!(
        progress
            .recent_errors
            .iter()
            .filter(|kind| **kind == ErrorKind::HttpServerError(500))
            .count(),
        3
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_client_errors_are_dead_lettered() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ok/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(0)))
        .mount(&mock_server)
        .await;

    let (engine, _) = http_engine(test_config());
    let spec = JobSpec::new(
        "partial",
        vec![
            format!("{}/ok/1", base_url),
            format!("{}/gone", base_url),
            format!("{}/ok/2", base_url),
        ],
    );

    let job = engine.submit(spec).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.outcome(), JobOutcome::CompletedWithErrors(1));
    let gone = &engine.item_states(job).unwrap()[1];
    assert_eq!(gone.state, WorkItemState::DeadLettered);
    assert_eq!(gone.last_error, Some(ErrorKind::HttpClientError(404)));
    assert_eq!(gone.retry_count, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_persistent_server_errors_exhaust_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.retry.max_attempts = 3;
    let (engine, _) = http_engine(config);
    let job = engine
        .submit(JobSpec::new("down", vec![format!("{}/x", mock_server.uri())]))
        .unwrap();

    let progress = engine.wait(job).await.unwrap();
    assert_eq!(progress.dead_lettered, 1);

    let item = &engine.item_states(job).unwrap()[0];
    assert_eq!(item.retry_count, 2);
    assert_eq!(item.last_error, Some(ErrorKind::HttpServerError(503)));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);

    engine.shutdown().await;
}
