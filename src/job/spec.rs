use crate::pipeline::StageSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_concurrency() -> u32 {
    4
}

/// A job as submitted by a caller
///
/// Stored alongside the job checkpoint, so a recovered job runs with exactly
/// the specification it was submitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobSpec {
    pub name: String,

    /// Frontier in submission order
    pub entry_urls: Vec<String>,

    /// Field name to CSS selector, passed through to the extract stage
    #[serde(default)]
    pub extraction_rules: BTreeMap<String, String>,

    /// Requested worker pool size; capped by the engine
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    #[serde(default)]
    pub rate_limits: Vec<RateLimitSpec>,

    /// Every attempt must hold a credential lease for the item's domain
    #[serde(default)]
    pub require_credentials: bool,

    #[serde(default)]
    pub ordering: FrontierOrdering,

    /// Fields hashed into the fingerprint; the normalized URL when empty
    #[serde(default)]
    pub fingerprint_fields: Vec<String>,

    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl JobSpec {
    /// A job over `entry_urls` with every other setting at its default
    pub fn new(name: impl Into<String>, entry_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            entry_urls,
            extraction_rules: BTreeMap::new(),
            concurrency: default_concurrency(),
            rate_limits: Vec::new(),
            require_credentials: false,
            ordering: FrontierOrdering::default(),
            fingerprint_fields: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// The stage chain the pipeline runs
    ///
    /// A job with extraction rules but no explicit stages gets an implicit
    /// extract stage, so rules are never silently ignored.
    pub fn effective_stages(&self) -> Vec<StageSpec> {
        if self.stages.is_empty() && !self.extraction_rules.is_empty() {
            vec![StageSpec::Extract]
        } else {
            self.stages.clone()
        }
    }
}

/// Token bucket settings for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitSpec {
    pub domain: String,
    pub capacity: u32,
    pub refill_per_sec: f64,
}

/// Order in which queued items are admitted into the worker pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontierOrdering {
    /// Strict submission order
    #[default]
    Fifo,

    /// Submission order, but prefer domains with nothing in flight
    DomainFair,
}
