//! Crash and restart against a database file

use crate::common::{test_config, StubFetcher};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::output::MemorySink;
use sumi_harvest::storage::SqliteStore;
use sumi_harvest::{Engine, JobId, JobStatus, WorkItemState};
use tempfile::TempDir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

fn urls() -> Vec<String> {
    (0..10).map(|n| format!("https://resume.test/{}", n)).collect()
}

#[test]
fn test_restart_does_not_refetch_completed_items() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("harvest.db");

    // First process: stop partway through
    let first_fetcher = StubFetcher::new(Duration::from_millis(100));
    let job: JobId = runtime().block_on(async {
        let engine = Engine::new(
            test_config(),
            SqliteStore::new(&db).unwrap(),
            first_fetcher.clone(),
            Arc::new(MemorySink::new()),
        )
        .unwrap();

        let mut spec = sumi_harvest::JobSpec::new("resumable", urls());
        spec.concurrency = 2;
        let job = engine.submit(spec).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        engine.shutdown().await;
        job
    });

    // Second process: recover and finish
    let second_fetcher = StubFetcher::new(Duration::from_millis(100));
    let second_sink = Arc::new(MemorySink::new());
    let done_before = runtime().block_on(async {
        let engine = Engine::new(
            test_config(),
            SqliteStore::new(&db).unwrap(),
            second_fetcher.clone(),
            second_sink.clone(),
        )
        .unwrap();

        let before = engine.status(job).unwrap();
        assert_eq!(before.status, JobStatus::Running);
        assert!(before.done >= 4, "done before restart: {}", before.done);
        assert!(before.done < 10);

        let done_before: Vec<String> = engine
            .item_states(job)
            .unwrap()
            .into_iter()
            .filter(|item| item.state == WorkItemState::Done)
            .map(|item| item.url.to_string())
            .collect();

        assert_eq!(engine.recover().unwrap(), vec![job]);
        let progress = engine.wait(job).await.unwrap();
        assert_eq!(progress.status, JobStatus::Completed);
        assert_eq!(progress.done, 10);
        assert_eq!(progress.resume_cursor, 10);

        engine.shutdown().await;
        done_before
    });

    for url in &done_before {
        assert_eq!(second_fetcher.fetches(url), 0, "{} fetched again", url);
    }
    assert_eq!(done_before.len() + second_sink.len(), 10);
    assert_eq!(first_fetcher.total() + second_fetcher.total(), 10);
}

#[test]
fn test_paused_job_stays_paused_after_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("harvest.db");
    let fetcher = StubFetcher::new(Duration::from_millis(10));

    let job = runtime().block_on(async {
        let engine = Engine::new(
            test_config(),
            SqliteStore::new(&db).unwrap(),
            fetcher.clone(),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        let job = engine
            .submit(sumi_harvest::JobSpec::new("held", urls()))
            .unwrap();
        engine.pause(job).unwrap();
        engine.shutdown().await;
        job
    });

    runtime().block_on(async {
        let engine = Engine::new(
            test_config(),
            SqliteStore::new(&db).unwrap(),
            fetcher.clone(),
            Arc::new(MemorySink::new()),
        )
        .unwrap();

        engine.recover().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.status(job).unwrap().status, JobStatus::Paused);
        assert_eq!(fetcher.total(), 0);

        engine.resume(job).unwrap();
        assert_eq!(engine.wait(job).await.unwrap().done, 10);
        engine.shutdown().await;
    });
}
