use crate::config::types::Config;
use crate::config::validation::{validate, validate_credential_spec, validate_job_spec};
use crate::credentials::CredentialSpec;
use crate::job::JobSpec;
use crate::ConfigError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Max workers: {}", config.engine.max_workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at start-up so runs against different settings can be told apart.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Loads a job specification from a TOML file
///
/// # Arguments
///
/// * `path` - Path to the job file
///
/// # Returns
///
/// * `Ok(JobSpec)` - Parsed and validated job specification
/// * `Err(ConfigError)` - Failed to read, parse, or validate the job
pub fn load_job_spec(path: &Path) -> Result<JobSpec, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let spec: JobSpec = toml::from_str(&content)?;
    validate_job_spec(&spec)?;
    Ok(spec)
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default, rename = "credential")]
    credentials: Vec<CredentialSpec>,
}

/// Loads credential uploads from a TOML file of `[[credential]]` tables
pub fn load_credentials(path: &Path) -> Result<Vec<CredentialSpec>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let file: CredentialFile = toml::from_str(&content)?;
    for spec in &file.credentials {
        validate_credential_spec(spec)?;
    }
    Ok(file.credentials)
}
