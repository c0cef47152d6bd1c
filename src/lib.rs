//! Sumi-Harvest: a crawl orchestration engine
//!
//! This crate drives bulk web-fetch jobs to completion under bounded
//! concurrency, per-domain rate limits and leased credentials, and resumes
//! them from durable checkpoints without re-fetching completed work.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod governor;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Identifier of a submitted job
pub type JobId = uuid::Uuid;

/// Main error type for Sumi-Harvest operations
///
/// These are infrastructure errors. Per-attempt fetch failures are described
/// by [`state::ErrorKind`] and never surface here.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Result sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {job} is already {status}")]
    JobFinished {
        job: JobId,
        status: state::JobStatus,
    },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::WorkItemState,
        to: state::WorkItemState,
    },

    #[error("Infrastructure fault: {0}")]
    Fault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector for field '{field}': {message}")]
    InvalidSelector { field: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use engine::Engine;
pub use job::{JobOutcome, JobProgress, JobSpec};
pub use state::{ErrorKind, JobStatus, WorkItemState};
