//! Configuration module for Sumi-Harvest
//!
//! This module handles loading, parsing, and validating the engine's TOML
//! configuration, as well as the job and credential files fed to the CLI.
//!
//! # Example
//!
//! ```no_run
//! use sumi_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Engine will run at most {} workers", config.engine.max_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CircuitBreakerConfig, Config, CredentialConfig, EngineConfig, OutputConfig, RateConfig,
    RetryConfig, StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_credentials, load_job_spec,
};
pub use validation::{validate, validate_credential_spec, validate_job_spec};
