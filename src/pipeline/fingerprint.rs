//! Item fingerprints and the per-job fingerprint set

use crate::pipeline::Item;
use crate::url::normalize_url;
use crate::JobId;
use dashmap::DashSet;
use sha2::{Digest, Sha256};

/// Computes the deduplication fingerprint of an item
///
/// With `fields` set, the fingerprint covers those fields in the given order,
/// so two pages carrying the same product under different URLs collapse. With
/// no fields it covers the normalized target URL.
///
/// # Returns
///
/// Lowercase hex SHA-256 digest
pub fn compute_fingerprint(item: &Item, fields: &[String]) -> String {
    let mut hasher = Sha256::new();

    if fields.is_empty() {
        let url = normalize_url(&item.url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| item.url.clone());
        hasher.update(url.as_bytes());
    } else {
        for field in fields {
            let value = item.field_text(field).unwrap_or_default();
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
    }

    hex::encode(hasher.finalize())
}

/// Fingerprints already emitted, scoped per job
///
/// Insertion is atomic, so two workers finishing identical items at the same
/// moment cannot both see them as new.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    seen: DashSet<(JobId, String)>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fingerprint for a job
    ///
    /// # Returns
    ///
    /// `true` if the fingerprint was new
    pub fn check_and_insert(&self, job: JobId, fingerprint: &str) -> bool {
        self.seen.insert((job, fingerprint.to_string()))
    }

    /// Forgets a fingerprint whose item never reached the sink
    pub fn remove(&self, job: JobId, fingerprint: &str) -> bool {
        self.seen.remove(&(job, fingerprint.to_string())).is_some()
    }

    pub fn contains(&self, job: JobId, fingerprint: &str) -> bool {
        self.seen.contains(&(job, fingerprint.to_string()))
    }

    /// Seeds a job's fingerprints from the checkpoint store
    pub fn load(&self, job: JobId, fingerprints: impl IntoIterator<Item = String>) -> usize {
        fingerprints
            .into_iter()
            .filter(|fp| self.seen.insert((job, fp.clone())))
            .count()
    }

    pub fn clear_job(&self, job: JobId) {
        self.seen.retain(|(owner, _)| *owner != job);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
