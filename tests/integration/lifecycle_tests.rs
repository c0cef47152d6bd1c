//! Pause, resume and cancel through the public engine API

use crate::common::{stub_engine, test_config, StubFetcher};
use std::time::Duration;
use sumi_harvest::{HarvestError, JobOutcome, JobSpec, JobStatus, WorkItemState};

fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://life.test/{}", i)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_pause_lets_in_flight_attempts_finish() {
    let fetcher = StubFetcher::new(Duration::from_millis(500));
    let (engine, _) = stub_engine(test_config(), fetcher.clone());

    let mut spec = JobSpec::new("pausable", urls(8));
    spec.concurrency = 2;
    let job = engine.submit(spec).unwrap();

    // Two attempts are in flight when the pause lands
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause(job).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let progress = engine.status(job).unwrap();
    assert_eq!(progress.status, JobStatus::Paused);
    assert_eq!(progress.done, 2);
    assert_eq!(progress.in_flight, 0);
    assert_eq!(progress.queued, 6);
    assert_eq!(fetcher.total(), 2);

    engine.resume(job).unwrap();
    let progress = engine.wait(job).await.unwrap();
    assert_eq!(progress.outcome(), JobOutcome::Completed);
    assert_eq!(fetcher.total(), 8);

    assert!(matches!(
        engine.pause(job),
        Err(HarvestError::JobFinished { .. })
    ));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_marks_unfinished_items() {
    let fetcher = StubFetcher::new(Duration::from_millis(500));
    let (engine, sink) = stub_engine(test_config(), fetcher.clone());

    let mut spec = JobSpec::new("cancellable", urls(10));
    spec.concurrency = 2;
    let job = engine.submit(spec).unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    engine.cancel(job).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.outcome(), JobOutcome::Cancelled);
    assert_eq!(progress.done + progress.cancelled, 10);
    assert_eq!(progress.done, sink.items_for(job).len());
    assert!(progress.cancelled >= 6);

    let items = engine.item_states(job).unwrap();
    assert!(items
        .iter()
        .all(|item| matches!(item.state, WorkItemState::Done | WorkItemState::Cancelled)));
    assert!(items.iter().all(|item| item.lease_token.is_none()));

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_jobs_share_the_engine() {
    let fetcher = StubFetcher::new(Duration::from_millis(50));
    let (engine, sink) = stub_engine(test_config(), fetcher.clone());

    let first = engine.submit(JobSpec::new("first", urls(5))).unwrap();
    let second = engine
        .submit(JobSpec::new(
            "second",
            (0..5).map(|i| format!("https://other.test/{}", i)).collect(),
        ))
        .unwrap();

    assert_eq!(engine.wait(first).await.unwrap().done, 5);
    assert_eq!(engine.wait(second).await.unwrap().done, 5);
    assert_eq!(sink.items_for(first).len(), 5);
    assert_eq!(sink.items_for(second).len(), 5);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_finished_jobs_are_archived() {
    let fetcher = StubFetcher::new(Duration::from_millis(50));
    let (engine, _) = stub_engine(test_config(), fetcher.clone());

    let mut finished = Vec::new();
    for round in 0..3 {
        let spec = JobSpec::new(
            format!("round-{}", round),
            (0..4).map(|i| format!("https://round{}.test/{}", round, i)).collect(),
        );
        let job = engine.submit(spec).unwrap();
        assert!(engine.jobs().contains(&job));
        assert_eq!(engine.wait(job).await.unwrap().done, 4);
        finished.push(job);
    }

    let cancelled = engine.submit(JobSpec::new("cancelled", urls(4))).unwrap();
    engine.cancel(cancelled).unwrap();
    engine.wait(cancelled).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Only live jobs stay in memory
    assert!(engine.jobs().is_empty());

    // Archived jobs are still answered from the checkpoint store
    for job in &finished {
        let progress = engine.status(*job).unwrap();
        assert_eq!(progress.status, JobStatus::Completed);
        assert_eq!(progress.done, 4);
        assert_eq!(engine.wait(*job).await.unwrap().done, 4);
        assert_eq!(engine.item_states(*job).unwrap().len(), 4);
        assert!(matches!(
            engine.pause(*job),
            Err(HarvestError::JobFinished {
                status: JobStatus::Completed,
                ..
            })
        ));
    }
    assert_eq!(engine.status(cancelled).unwrap().status, JobStatus::Cancelled);
    assert!(matches!(
        engine.resume(cancelled),
        Err(HarvestError::JobFinished { .. })
    ));

    engine.shutdown().await;
}
