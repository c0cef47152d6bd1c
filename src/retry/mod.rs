//! Retry/Backoff Policy and domain circuit breaker

mod breaker;
mod policy;

pub use breaker::CircuitBreaker;
pub use policy::{AttemptHistory, RetryDecision, RetryPolicy};
