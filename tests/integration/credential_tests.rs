//! Jobs that require leased credentials

use crate::common::{stub_engine, test_config, StubFetcher};
use std::time::Duration;
use sumi_harvest::credentials::{CredentialKind, CredentialSpec};
use sumi_harvest::{ErrorKind, JobOutcome, JobSpec, WorkItemState};

#[tokio::test(start_paused = true)]
async fn test_domain_without_credentials_is_dead_lettered() {
    let fetcher = StubFetcher::new(Duration::from_millis(20));
    let (engine, sink) = stub_engine(test_config(), fetcher.clone());

    engine
        .upload_credential(CredentialSpec {
            scope: "b.test".to_string(),
            kind: CredentialKind::Cookie,
            payload: "session=abc".to_string(),
        })
        .unwrap();

    let mut spec = JobSpec::new(
        "leased",
        vec![
            "https://a.test/1".to_string(),
            "https://b.test/1".to_string(),
            "https://a.test/2".to_string(),
            "https://b.test/2".to_string(),
        ],
    );
    spec.require_credentials = true;

    let job = engine.submit(spec).unwrap();
    let progress = engine.wait(job).await.unwrap();

    assert_eq!(progress.outcome(), JobOutcome::CompletedWithErrors(2));
    assert_eq!(sink.items_for(job).len(), 2);
    assert_eq!(fetcher.fetches("https://a.test/1"), 0);

    for item in engine.item_states(job).unwrap() {
        if item.domain == "a.test" {
            assert_eq!(item.state, WorkItemState::DeadLettered);
            assert_eq!(item.last_error, Some(ErrorKind::NoCredentialAvailable));
        } else {
            assert_eq!(item.state, WorkItemState::Done);
            assert!(item.lease_token.is_none());
        }
    }

    let stats = engine.credential_stats();
    assert_eq!(stats["b.test"].available, 1);
    assert_eq!(stats["b.test"].leased, 0);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_credential_serializes_attempts() {
    let fetcher = StubFetcher::new(Duration::from_millis(100));
    let (engine, _) = stub_engine(test_config(), fetcher.clone());

    engine
        .upload_credential(CredentialSpec {
            scope: "shop.test".to_string(),
            kind: CredentialKind::Cookie,
            payload: "session=one".to_string(),
        })
        .unwrap();

    let urls = (0..4).map(|n| format!("https://www.shop.test/{}", n)).collect();
    let mut spec = JobSpec::new("one-lease", urls);
    spec.require_credentials = true;
    spec.concurrency = 4;

    let job = engine.submit(spec).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = engine.credential_stats();
    assert_eq!(stats["shop.test"].leased, 1);
    let in_flight = engine
        .item_states(job)
        .unwrap()
        .iter()
        .filter(|item| item.state == WorkItemState::InFlight)
        .count();
    assert!(in_flight <= 1);

    let progress = engine.wait(job).await.unwrap();
    assert_eq!(progress.done, 4);

    engine.shutdown().await;
}
