use crate::config::RateConfig;
use crate::governor::bucket::{RateLimit, Reservation, TokenBucket};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of asking for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was available
    Immediate,

    /// Admitted after waiting this long for a token
    AfterWait(Duration),

    /// The wait would exceed the ceiling; nothing was consumed
    Denied { would_wait: Duration },

    /// The caller was cancelled while waiting
    Cancelled,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Immediate | Self::AfterWait(_))
    }
}

/// Per-domain token-bucket admission control
///
/// Buckets are created on first use and never shared between domains; each
/// sits behind its own lock.
pub struct RateGovernor {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    overrides: DashMap<String, RateLimit>,
    default_limit: RateLimit,
    max_wait: Duration,
}

impl RateGovernor {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            overrides: DashMap::new(),
            default_limit: RateLimit {
                capacity: config.default_capacity,
                refill_per_sec: config.default_refill_per_sec,
            },
            max_wait: config.max_admission_wait(),
        }
    }

    /// Sets the bucket for a domain
    ///
    /// Buckets are domain-scoped, not job-scoped: the most recently
    /// submitted limit for a domain applies to every job fetching from it.
    pub fn set_limit(&self, domain: &str, limit: RateLimit) {
        tracing::debug!(
            "Rate limit for {}: capacity {}, {} per second",
            domain,
            limit.capacity,
            limit.refill_per_sec
        );
        self.overrides.insert(domain.to_string(), limit);
        if let Some(bucket) = self.buckets.get(domain) {
            bucket.lock().unwrap().reconfigure(limit, Instant::now());
        }
    }

    pub fn limit_for(&self, domain: &str) -> RateLimit {
        self.overrides
            .get(domain)
            .map(|limit| *limit.value())
            .unwrap_or(self.default_limit)
    }

    /// Waits for a token for `domain`
    ///
    /// Suspends the caller for as long as its reserved token takes to
    /// accrue, up to the configured ceiling. A caller whose wait would
    /// exceed the ceiling is denied at once.
    pub async fn admit(&self, domain: &str, cancel: &CancellationToken) -> Admission {
        let bucket = self.bucket(domain);
        let reservation = bucket.lock().unwrap().reserve(Instant::now(), self.max_wait);

        match reservation {
            Reservation::Ready => {
                tracing::trace!("Admitted {} immediately", domain);
                Admission::Immediate
            }
            Reservation::TooLong(would_wait) => {
                tracing::debug!(
                    "Denied admission to {}: would wait {:?} (ceiling {:?})",
                    domain,
                    would_wait,
                    self.max_wait
                );
                Admission::Denied { would_wait }
            }
            Reservation::Wait(wait) => {
                tracing::trace!("Waiting {:?} for admission to {}", wait, domain);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // The reserved token goes back to later callers
                        bucket.lock().unwrap().refund(Instant::now());
                        Admission::Cancelled
                    }
                    _ = tokio::time::sleep(wait) => Admission::AfterWait(wait),
                }
            }
        }
    }

    fn bucket(&self, domain: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(domain) {
            return Arc::clone(bucket.value());
        }

        let limit = self.limit_for(domain);
        Arc::clone(
            self.buckets
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limit, Instant::now()))))
                .value(),
        )
    }
}
