//! Storage module for durable job checkpoints
//!
//! This module persists everything a restarted engine needs:
//! - Job records with their submitted specification, status and resume cursor
//! - Work item states, retry counts and last errors
//! - Per-job fingerprint sets
//! - The credential table

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};

use crate::credentials::{Credential, CredentialId, CredentialKind, CredentialStatus};
use crate::job::JobSpec;
use crate::state::JobStatus;
use crate::JobId;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The store as shared between the engine, job runners and the reclaimer
pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// Opens or creates a checkpoint database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}

/// A job as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub resume_cursor: usize,
    pub failure: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    /// A pending record for a freshly submitted job
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            name: spec.name.clone(),
            spec,
            status: JobStatus::Pending,
            resume_cursor: 0,
            failure: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A credential as persisted; lease state is never stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub scope: String,
    pub kind: CredentialKind,
    pub payload: String,
    pub status: CredentialStatus,
    pub usage_count: u64,
    pub consecutive_client_errors: u32,
}

impl From<&Credential> for CredentialRecord {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id,
            scope: credential.scope.clone(),
            kind: credential.kind,
            payload: credential.payload.clone(),
            status: credential.status,
            usage_count: credential.usage_count,
            consecutive_client_errors: credential.consecutive_client_errors,
        }
    }
}
