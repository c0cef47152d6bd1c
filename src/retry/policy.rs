use crate::config::RetryConfig;
use crate::state::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// What to do with an item after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue, not before this delay has passed
    Retry(Duration),
    Abandon,
}

/// An item's failure history, including the attempt just made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptHistory {
    /// Attempts made so far, at least 1
    pub attempts: u32,

    /// Content errors seen so far
    pub content_errors: u32,
}

/// Exponential backoff with jitter
///
/// Stateless: the decision depends only on the error kind and the item's
/// history.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    content_error_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            content_error_retries: config.content_error_retries,
        }
    }

    /// Decides with random jitter
    pub fn decide(&self, kind: ErrorKind, history: AttemptHistory) -> RetryDecision {
        let jitter = rand::rng().random::<f64>();
        self.decide_with_jitter(kind, history, jitter)
    }

    /// Decides with a given jitter fraction in `[0, 1)`
    ///
    /// # Rules
    ///
    /// | Condition | Decision |
    /// |-----------|----------|
    /// | attempts >= max attempts | Abandon |
    /// | HTTP 4xx (429 arrives as `RateLimited`) | Abandon |
    /// | Content error beyond the allowed retries | Abandon |
    /// | Anything else | Retry after backoff |
    pub fn decide_with_jitter(
        &self,
        kind: ErrorKind,
        history: AttemptHistory,
        jitter: f64,
    ) -> RetryDecision {
        if history.attempts >= self.max_attempts {
            return RetryDecision::Abandon;
        }

        match kind {
            ErrorKind::HttpClientError(_) => RetryDecision::Abandon,
            ErrorKind::ContentError if history.content_errors > self.content_error_retries => {
                RetryDecision::Abandon
            }
            _ => RetryDecision::Retry(
                self.backoff_delay(history.attempts.saturating_sub(1), jitter),
            ),
        }
    }

    /// `min(base * 2^retries, cap)` plus `jitter` times that delay
    ///
    /// Non-decreasing in `retries` for a fixed jitter, and never above
    /// twice the cap.
    pub fn backoff_delay(&self, retries: u32, jitter: f64) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        delay + delay.mul_f64(jitter.clamp(0.0, 1.0))
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}
