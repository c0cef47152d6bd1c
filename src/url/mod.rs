//! URL handling module for Sumi-Harvest
//!
//! This module provides target parsing, canonical URL normalization for
//! fingerprints, domain extraction and credential scope matching.

mod domain;
mod matcher;
mod normalize;

pub use domain::domain_of;
pub use matcher::{scope_applies, scope_candidates};
pub use normalize::{normalize_url, parse_target};
