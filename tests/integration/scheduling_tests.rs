//! Scheduling around delayed work: retries held by a pause, domains held by
//! an open circuit

use crate::common::{stub_engine, test_config, StubFetcher};
use std::time::Duration;
use sumi_harvest::{ErrorKind, JobOutcome, JobSpec, JobStatus, WorkItemState};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_pause_holds_pending_retry() {
    let mut config = test_config();
    config.retry.base_delay_ms = 1_000;
    config.retry.max_delay_ms = 2_000;

    let fetcher = StubFetcher::new(Duration::from_millis(50));
    fetcher.fail("https://sched.test/0", ErrorKind::HttpServerError(500), 1);
    let (engine, _) = stub_engine(config, fetcher.clone());

    let job = engine
        .submit(JobSpec::new("held", vec!["https://sched.test/0".to_string()]))
        .unwrap();

    // The first attempt fails and the retry is scheduled about a second out
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause(job).unwrap();

    // Well past the retry's due time; a runner woken by it would never idle
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(engine.status(job).unwrap().status, JobStatus::Paused);
    let items = engine.item_states(job).unwrap();
    assert_eq!(items[0].state, WorkItemState::Queued);
    assert_eq!(items[0].retry_count, 1);
    assert_eq!(items[0].last_error, Some(ErrorKind::HttpServerError(500)));
    assert_eq!(fetcher.fetches("https://sched.test/0"), 1);

    engine.resume(job).unwrap();
    let progress = engine.wait(job).await.unwrap();
    assert_eq!(progress.done, 1);
    assert_eq!(fetcher.fetches("https://sched.test/0"), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_defers_domain() {
    let mut config = test_config();
    config.circuit_breaker.min_samples = 2;
    config.circuit_breaker.abandon_ratio = 0.5;
    config.circuit_breaker.window_secs = 60;
    config.circuit_breaker.cooldown_secs = 30;

    let fetcher = StubFetcher::new(Duration::from_millis(100));
    fetcher.fail("bad.test", ErrorKind::HttpClientError(404), usize::MAX);
    let (engine, _) = stub_engine(config, fetcher.clone());

    let bad: Vec<String> = (0..6).map(|i| format!("https://bad.test/{}", i)).collect();
    let good: Vec<String> = (0..4).map(|i| format!("https://good.test/{}", i)).collect();
    let mut spec = JobSpec::new("breaker", bad.iter().chain(&good).cloned().collect());
    spec.concurrency = 1;

    let started = Instant::now();
    let job = engine.submit(spec).unwrap();

    // Two abandons trip the circuit; the other domain keeps going
    tokio::time::sleep(Duration::from_secs(5)).await;

    let items = engine.item_states(job).unwrap();
    for item in &items[..2] {
        assert_eq!(item.state, WorkItemState::DeadLettered, "{}", item.url);
    }
    for item in &items[2..6] {
        assert_eq!(item.state, WorkItemState::Queued, "{}", item.url);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.last_error, None);
    }
    for item in &items[6..] {
        assert_eq!(item.state, WorkItemState::Done, "{}", item.url);
    }
    for url in &bad[2..] {
        assert_eq!(fetcher.fetches(url), 0, "{} fetched while the circuit was open", url);
    }
    assert_eq!(engine.status(job).unwrap().status, JobStatus::Running);

    // After the cool-down the held items are attempted and abandoned
    let progress = engine.wait(job).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.outcome(), JobOutcome::CompletedWithErrors(6));
    assert_eq!(progress.dead_lettered, 6);
    assert_eq!(progress.done, 4);
    assert_eq!(progress.resume_cursor, 10);
    for url in &bad {
        assert_eq!(fetcher.fetches(url), 1);
    }

    engine.shutdown().await;
}
