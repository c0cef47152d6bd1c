//! Checkpoint store trait and error types

use crate::job::WorkItem;
use crate::state::JobStatus;
use crate::storage::{CredentialRecord, JobRecord};
use crate::JobId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable record of everything the engine must survive a restart with
///
/// Job status and resume cursor, work item states, fingerprint sets and the
/// credential table. Every write returns only once it is durable, so a crash
/// after a checkpoint can at worst repeat a fetch, never lose one.
pub trait CheckpointStore {
    // ===== Jobs =====

    /// Persists a new job with its whole frontier
    ///
    /// # Arguments
    ///
    /// * `job` - The job record
    /// * `items` - Every work item, in frontier order
    fn create_job(&mut self, job: &JobRecord, items: &[WorkItem]) -> StorageResult<()>;

    /// Sets a job's status and, for failed jobs, the reason
    fn update_job_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        failure: Option<&str>,
    ) -> StorageResult<()>;

    fn update_resume_cursor(&mut self, job: JobId, cursor: usize) -> StorageResult<()>;

    fn get_job(&self, job: JobId) -> StorageResult<JobRecord>;

    /// All jobs, oldest first
    fn list_jobs(&self) -> StorageResult<Vec<JobRecord>>;

    /// Jobs a restart should pick up again (Pending, Running or Paused)
    fn load_unfinished_jobs(&self) -> StorageResult<Vec<JobRecord>>;

    // ===== Work items =====

    /// Records one item's new state
    ///
    /// The fingerprint and cursor advance, when given, are written in the same
    /// transaction so they can never disagree with the item state.
    ///
    /// # Arguments
    ///
    /// * `job` - The owning job
    /// * `item` - The item after its transition
    /// * `fingerprint` - Fingerprint claimed by a Done item
    /// * `resume_cursor` - New cursor position if this item advanced it
    fn checkpoint_item(
        &mut self,
        job: JobId,
        item: &WorkItem,
        fingerprint: Option<&str>,
        resume_cursor: Option<usize>,
    ) -> StorageResult<()>;

    /// Marks every unfinished item of a job Cancelled
    ///
    /// # Returns
    ///
    /// The number of items cancelled
    fn cancel_items(&mut self, job: JobId) -> StorageResult<usize>;

    /// A job's items in frontier order
    fn load_items(&self, job: JobId) -> StorageResult<Vec<WorkItem>>;

    fn load_fingerprints(&self, job: JobId) -> StorageResult<Vec<String>>;

    // ===== Credentials =====

    /// Upserts credential records
    fn save_credentials(&mut self, records: &[CredentialRecord]) -> StorageResult<()>;

    fn load_credentials(&self) -> StorageResult<Vec<CredentialRecord>>;
}
