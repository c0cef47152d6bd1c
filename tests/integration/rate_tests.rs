//! Rate governor behaviour observed through whole jobs

use crate::common::{stub_engine, test_config, StubFetcher};
use std::time::Duration;
use sumi_harvest::job::{FrontierOrdering, RateLimitSpec};
use sumi_harvest::{JobSpec, WorkItemState};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_rate_limit_paces_the_job() {
    let fetcher = StubFetcher::new(Duration::ZERO);
    let (engine, sink) = stub_engine(test_config(), fetcher.clone());

    let urls = (0..20).map(|n| format!("https://slow.test/{}", n)).collect();
    let mut spec = JobSpec::new("paced", urls);
    spec.concurrency = 5;
    spec.rate_limits = vec![RateLimitSpec {
        domain: "slow.test".to_string(),
        capacity: 1,
        refill_per_sec: 2.0,
    }];

    let started = Instant::now();
    let job = engine.submit(spec).unwrap();
    let progress = engine.wait(job).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(progress.done, 20);
    assert_eq!(fetcher.total(), 20);
    assert_eq!(sink.len(), 20);
    assert!(elapsed >= Duration::from_secs(9), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(15), "took {:?}", elapsed);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_other_domains_are_not_held_back() {
    let fetcher = StubFetcher::new(Duration::from_millis(10));
    let (engine, _) = stub_engine(test_config(), fetcher.clone());

    let mut urls: Vec<String> = (0..2).map(|n| format!("https://slow.test/{}", n)).collect();
    urls.extend((0..6).map(|n| format!("https://fast.test/{}", n)));
    let mut spec = JobSpec::new("mixed", urls);
    spec.concurrency = 4;
    spec.ordering = FrontierOrdering::DomainFair;
    spec.rate_limits = vec![RateLimitSpec {
        domain: "slow.test".to_string(),
        capacity: 1,
        refill_per_sec: 0.5,
    }];

    let job = engine.submit(spec).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The second slow item is still waiting for a token
    let items = engine.item_states(job).unwrap();
    let fast_done = items
        .iter()
        .filter(|item| item.domain == "fast.test" && item.state == WorkItemState::Done)
        .count();
    assert_eq!(fast_done, 6);
    assert_ne!(items[1].state, WorkItemState::Done);

    let progress = engine.wait(job).await.unwrap();
    assert_eq!(progress.done, 8);

    engine.shutdown().await;
}
