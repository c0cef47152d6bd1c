//! Result sink trait and error types

use crate::pipeline::Item;
use crate::JobId;
use async_trait::async_trait;
use thiserror::Error;

/// Errors a result sink can report
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write result: {0}")]
    Write(String),

    #[error("Failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Storage capability the engine hands clean items to
///
/// The engine calls `store` once per clean, deduplicated item and treats an
/// error as an infrastructure fault that fails the job. Implementations must
/// be safe to call from many workers at once.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persists one item produced by `job`
    ///
    /// # Arguments
    ///
    /// * `job` - The job the item belongs to
    /// * `item` - The clean item
    async fn store(&self, job: JobId, item: &Item) -> SinkResult<()>;
}
