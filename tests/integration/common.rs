//! Shared fixtures for the integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_harvest::config::{Config, UserAgentConfig};
use sumi_harvest::engine::{FetchRequest, FetchedPage, Fetcher};
use sumi_harvest::output::MemorySink;
use sumi_harvest::storage::SqliteStore;
use sumi_harvest::{Engine, ErrorKind};

/// Creates a test configuration with fast retries and a generous default bucket
pub fn test_config() -> Config {
    let mut config = Config::with_user_agent(UserAgentConfig {
        crawler_name: "TestHarvest".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    });
    config.retry.base_delay_ms = 20;
    config.retry.max_delay_ms = 200;
    config.rate.default_capacity = 100;
    config.rate.default_refill_per_sec = 1000.0;
    config
}

/// Serves every URL after a fixed delay and counts fetches per URL
///
/// Failures can be scripted per URL or per host.
pub struct StubFetcher {
    delay: Duration,
    fetches: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, (ErrorKind, usize)>>,
}

impl StubFetcher {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fetches: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Fails the next `times` fetches of `target` (a full URL or a host)
    pub fn fail(&self, target: &str, kind: ErrorKind, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(target.to_string(), (kind, times));
    }

    fn scripted_failure(&self, request: &FetchRequest) -> Option<ErrorKind> {
        let mut failures = self.failures.lock().unwrap();
        let url = request.url.to_string();
        let host = request.url.host_str().unwrap_or_default().to_string();
        for key in [url, host] {
            if let Some((kind, remaining)) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(*kind);
                }
            }
        }
        None
    }

    pub fn fetches(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedPage, ErrorKind> {
        tokio::time::sleep(self.delay).await;
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(request.url.to_string())
            .or_default() += 1;

        if let Some(kind) = self.scripted_failure(&request) {
            return Err(kind);
        }

        Ok(FetchedPage {
            final_url: request.url.to_string(),
            status_code: 200,
            content_type: "text/html".to_string(),
            body: format!("<html><body><h1>{}</h1></body></html>", request.url.path()),
        })
    }
}

/// An engine over an in-memory store
pub fn stub_engine(config: Config, fetcher: Arc<StubFetcher>) -> (Engine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(
        config,
        SqliteStore::new_in_memory().expect("in-memory store"),
        fetcher,
        sink.clone(),
    )
    .expect("engine");
    (engine, sink)
}

/// An engine fetching over HTTP, as the CLI runs it
pub fn http_engine(config: Config) -> (Engine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::with_http(
        config,
        SqliteStore::new_in_memory().expect("in-memory store"),
        sink.clone(),
    )
    .expect("engine");
    (engine, sink)
}
