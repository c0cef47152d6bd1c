//! Rate Governor
//!
//! Per-domain token buckets gating every fetch attempt. Refill is
//! continuous; waiting callers sleep for exactly the time their token takes
//! to accrue.

mod bucket;
mod rate_governor;

pub use bucket::{RateLimit, Reservation, TokenBucket};
pub use rate_governor::{Admission, RateGovernor};
