//! The orchestration engine
//!
//! [`Engine`] is the entry point. Underneath it:
//! - `runner` drives one job's frontier to completion
//! - `executor` performs a single attempt: lease, admission, fetch
//! - `fetcher` is the network seam, with an HTTP implementation
//! - `frontier` orders ready and backed-off items

mod coordinator;
mod executor;
mod fetcher;
mod frontier;
mod runner;

pub use coordinator::Engine;
pub use executor::{AttemptOutcome, FetchExecutor};
pub use fetcher::{build_http_client, FetchRequest, FetchedPage, Fetcher, HttpFetcher};
pub use frontier::Frontier;
