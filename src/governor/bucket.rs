use std::time::Duration;
use tokio::time::Instant;

/// Capacity and refill rate of one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

/// Outcome of asking a bucket for a token
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reservation {
    /// A token was taken
    Ready,

    /// A future token was reserved; the caller must wait this long before using it
    Wait(Duration),

    /// The wait would exceed the ceiling; nothing was reserved
    TooLong(Duration),
}

/// Token bucket with continuous refill
///
/// Tokens accrue in proportion to elapsed time rather than on ticks. A
/// caller that has to wait reserves its token up front (the balance goes
/// negative), so waiters are served in arrival order and never poll.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    limit: RateLimit,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            limit,
            tokens: limit.capacity as f64,
            last_refill: now,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Changes the limit, keeping the current balance within the new capacity
    pub fn reconfigure(&mut self, limit: RateLimit, now: Instant) {
        self.refill(now);
        self.limit = limit;
        self.tokens = self.tokens.min(limit.capacity as f64);
    }

    /// Takes or reserves one token
    ///
    /// # Arguments
    ///
    /// * `now` - Current time
    /// * `max_wait` - Longest wait the caller accepts
    pub fn reserve(&mut self, now: Instant, max_wait: Duration) -> Reservation {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Reservation::Ready;
        }

        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64(deficit / self.limit.refill_per_sec);
        if wait > max_wait {
            return Reservation::TooLong(wait);
        }

        self.tokens -= 1.0;
        Reservation::Wait(wait)
    }

    /// Returns a reserved token whose holder gave up waiting
    pub fn refund(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens + 1.0).min(self.limit.capacity as f64);
    }

    /// Current balance; negative while reservations are outstanding
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * self.limit.refill_per_sec).min(self.limit.capacity as f64);
        self.last_refill = now;
    }
}
