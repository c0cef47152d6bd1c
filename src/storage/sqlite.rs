//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the CheckpointStore trait.

use crate::credentials::{CredentialKind, CredentialStatus};
use crate::job::{JobSpec, WorkItem};
use crate::state::{ErrorKind, JobStatus, WorkItemState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use crate::storage::{CredentialRecord, JobRecord};
use crate::url::parse_target;
use crate::JobId;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

const JOB_COLUMNS: &str =
    "id, name, spec, status, resume_cursor, failure, created_at, updated_at";

/// A job row before its text columns are decoded
type RawJob = (String, String, String, String, i64, Option<String>, String, String);

/// A work item row before its text columns are decoded
type RawItem = (i64, String, String, String, i64, i64, Option<String>);

/// SQLite checkpoint backend
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // FULL sync: a checkpoint must survive power loss, not just a crash
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn decode_job(raw: RawJob) -> StorageResult<JobRecord> {
        let (id, name, spec, status, resume_cursor, failure, created_at, updated_at) = raw;
        let spec: JobSpec = serde_json::from_str(&spec)
            .map_err(|e| StorageError::Serialization(format!("job {}: {}", id, e)))?;

        Ok(JobRecord {
            id: parse_uuid(&id)?,
            name,
            spec,
            status: JobStatus::from_db_string(&status)
                .ok_or_else(|| StorageError::Corrupt(format!("job status '{}'", status)))?,
            resume_cursor: resume_cursor as usize,
            failure,
            created_at,
            updated_at,
        })
    }

    fn decode_item(raw: RawItem) -> StorageResult<WorkItem> {
        let (position, url, domain, state, retry_count, content_errors, last_error) = raw;

        Ok(WorkItem {
            position: position as usize,
            url: parse_target(&url)
                .map_err(|e| StorageError::Corrupt(format!("item url '{}': {}", url, e)))?,
            domain,
            state: WorkItemState::from_db_string(&state)
                .ok_or_else(|| StorageError::Corrupt(format!("item state '{}'", state)))?,
            retry_count: retry_count as u32,
            content_errors: content_errors as u32,
            last_error: match last_error {
                Some(s) => Some(
                    ErrorKind::from_db_string(&s)
                        .ok_or_else(|| StorageError::Corrupt(format!("error kind '{}'", s)))?,
                ),
                None => None,
            },
            lease_token: None,
        })
    }

    fn query_jobs(&self, filter: &str) -> StorageResult<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs {} ORDER BY created_at, rowid",
            JOB_COLUMNS, filter
        ))?;

        let raw = stmt
            .query_map([], job_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter().map(Self::decode_job).collect()
    }
}

fn job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_uuid(s: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::Corrupt(format!("id '{}': {}", s, e)))
}

impl CheckpointStore for SqliteStore {
    // ===== Jobs =====

    fn create_job(&mut self, job: &JobRecord, items: &[WorkItem]) -> StorageResult<()> {
        let spec = serde_json::to_string(&job.spec)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, name, spec, status, resume_cursor, failure, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.name,
                spec,
                job.status.to_db_string(),
                job.resume_cursor as i64,
                job.failure,
                job.created_at,
                job.updated_at
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO work_items
                 (job_id, position, url, domain, state, retry_count, content_errors, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for item in items {
                stmt.execute(params![
                    job.id.to_string(),
                    item.position as i64,
                    item.url.as_str(),
                    item.domain,
                    item.state.to_db_string(),
                    item.retry_count,
                    item.content_errors,
                    item.last_error.map(|e| e.to_db_string()),
                    job.created_at
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn update_job_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        failure: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE jobs SET status = ?1, failure = COALESCE(?2, failure), updated_at = ?3 WHERE id = ?4",
            params![status.to_db_string(), failure, now, job.to_string()],
        )?;
        if updated == 0 {
            return Err(StorageError::JobNotFound(job));
        }
        Ok(())
    }

    fn update_resume_cursor(&mut self, job: JobId, cursor: usize) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        // MAX keeps the cursor from ever moving back
        self.conn.execute(
            "UPDATE jobs SET resume_cursor = MAX(resume_cursor, ?1), updated_at = ?2 WHERE id = ?3",
            params![cursor as i64, now, job.to_string()],
        )?;
        Ok(())
    }

    fn get_job(&self, job: JobId) -> StorageResult<JobRecord> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job.to_string()],
                job_row,
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(job))?;

        Self::decode_job(raw)
    }

    fn list_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        self.query_jobs("")
    }

    fn load_unfinished_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        self.query_jobs("WHERE status IN ('pending', 'running', 'paused')")
    }

    // ===== Work items =====

    fn checkpoint_item(
        &mut self,
        job: JobId,
        item: &WorkItem,
        fingerprint: Option<&str>,
        resume_cursor: Option<usize>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let job_id = job.to_string();

        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE work_items
             SET state = ?1, retry_count = ?2, content_errors = ?3, last_error = ?4, updated_at = ?5
             WHERE job_id = ?6 AND position = ?7",
            params![
                item.state.to_db_string(),
                item.retry_count,
                item.content_errors,
                item.last_error.map(|e| e.to_db_string()),
                now,
                job_id,
                item.position as i64
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::Database(format!(
                "no work item {} in job {}",
                item.position, job
            )));
        }

        if let Some(fingerprint) = fingerprint {
            tx.execute(
                "INSERT OR IGNORE INTO fingerprints (job_id, fingerprint) VALUES (?1, ?2)",
                params![job_id, fingerprint],
            )?;
        }

        if let Some(cursor) = resume_cursor {
            tx.execute(
                "UPDATE jobs SET resume_cursor = MAX(resume_cursor, ?1), updated_at = ?2 WHERE id = ?3",
                params![cursor as i64, now, job_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn cancel_items(&mut self, job: JobId) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let cancelled = self.conn.execute(
            "UPDATE work_items SET state = ?1, updated_at = ?2
             WHERE job_id = ?3 AND state NOT IN ('done', 'dead_lettered', 'cancelled')",
            params![WorkItemState::Cancelled.to_db_string(), now, job.to_string()],
        )?;
        Ok(cancelled)
    }

    fn load_items(&self, job: JobId) -> StorageResult<Vec<WorkItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, url, domain, state, retry_count, content_errors, last_error
             FROM work_items WHERE job_id = ?1 ORDER BY position",
        )?;

        let raw = stmt
            .query_map(params![job.to_string()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<RawItem>, _>>()?;

        raw.into_iter().map(Self::decode_item).collect()
    }

    fn load_fingerprints(&self, job: JobId) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fingerprint FROM fingerprints WHERE job_id = ?1")?;

        let fingerprints = stmt
            .query_map(params![job.to_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(fingerprints)
    }

    // ===== Credentials =====

    fn save_credentials(&mut self, records: &[CredentialRecord]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO credentials
                 (id, scope, kind, payload, status, usage_count, consecutive_client_errors)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    usage_count = excluded.usage_count,
                    consecutive_client_errors = excluded.consecutive_client_errors",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id.to_string(),
                    record.scope,
                    record.kind.to_db_string(),
                    record.payload,
                    record.status.to_db_string(),
                    record.usage_count as i64,
                    record.consecutive_client_errors
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_credentials(&self) -> StorageResult<Vec<CredentialRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scope, kind, payload, status, usage_count, consecutive_client_errors
             FROM credentials ORDER BY rowid",
        )?;

        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, u32>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, scope, kind, payload, status, usage_count, errors)| {
                Ok(CredentialRecord {
                    id: parse_uuid(&id)?,
                    scope,
                    kind: CredentialKind::from_db_string(&kind)
                        .ok_or_else(|| StorageError::Corrupt(format!("credential kind '{}'", kind)))?,
                    payload,
                    status: CredentialStatus::from_db_string(&status).ok_or_else(|| {
                        StorageError::Corrupt(format!("credential status '{}'", status))
                    })?,
                    usage_count: usage_count as u64,
                    consecutive_client_errors: errors,
                })
            })
            .collect()
    }
}
