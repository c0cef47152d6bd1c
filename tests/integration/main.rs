//! Integration tests for the orchestration engine
//!
//! Network scenarios run against wiremock servers; timing scenarios use a
//! stub fetcher under Tokio's paused clock.

mod common;
mod credential_tests;
mod lifecycle_tests;
mod pipeline_tests;
mod rate_tests;
mod recovery_tests;
mod retry_tests;
mod scheduling_tests;
