//! Pipeline and Fingerprint Store
//!
//! A fetched page becomes an [`Item`], runs through the job's ordered
//! [`Stage`] chain, and is checked against the job's fingerprints before it
//! reaches the result sink.

mod chain;
mod fingerprint;
mod item;
mod stage;
mod stages;

pub use chain::{Pipeline, Processed};
pub use fingerprint::{compute_fingerprint, FingerprintStore};
pub use item::Item;
pub use stage::{PipelineRejection, Stage};
pub use stages::{
    build_stages, ExtractStage, FieldKind, MinBodyLengthStage, NormalizeWhitespaceStage,
    RejectEmptyBodyStage, RequireFieldsStage, StageSpec, TrimStage, ValidateStage,
};
