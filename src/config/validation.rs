use crate::config::types::{
    CircuitBreakerConfig, Config, CredentialConfig, EngineConfig, RateConfig, RetryConfig,
    UserAgentConfig,
};
use crate::credentials::{CredentialKind, CredentialSpec};
use crate::job::JobSpec;
use crate::pipeline::StageSpec;
use crate::ConfigError;
use url::Url;

/// Upper bound on any concurrency setting
const MAX_CONCURRENCY: u32 = 1000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_rate_config(&config.rate)?;
    validate_retry_config(&config.retry)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_credential_config(&config.credentials)?;
    validate_user_agent_config(&config.user_agent)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    validate_concurrency("max_workers", config.max_workers)?;
    validate_concurrency("max_job_concurrency", config.max_job_concurrency)?;

    if config.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "fetch_timeout_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_config(config: &RateConfig) -> Result<(), ConfigError> {
    validate_bucket("default", config.default_capacity, config.default_refill_per_sec)
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if !(config.abandon_ratio >= 0.0 && config.abandon_ratio < 1.0) {
        return Err(ConfigError::Validation(format!(
            "abandon_ratio must be in [0, 1), got {}",
            config.abandon_ratio
        )));
    }

    if config.min_samples < 1 {
        return Err(ConfigError::Validation(
            "min_samples must be >= 1".to_string(),
        ));
    }

    if config.window_secs == 0 {
        return Err(ConfigError::Validation(
            "window_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_credential_config(config: &CredentialConfig) -> Result<(), ConfigError> {
    if config.lease_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "lease_ttl_secs must be > 0".to_string(),
        ));
    }

    if config.reclaim_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "reclaim_interval_ms must be > 0".to_string(),
        ));
    }

    if config.invalid_after_client_errors < 1 {
        return Err(ConfigError::Validation(
            "invalid_after_client_errors must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates a job specification before submission
///
/// Entry URLs are checked by the engine when it builds the frontier; this
/// covers the numeric limits and the pipeline shape.
pub fn validate_job_spec(spec: &JobSpec) -> Result<(), ConfigError> {
    if spec.name.trim().is_empty() {
        return Err(ConfigError::Validation("job name cannot be empty".to_string()));
    }

    validate_concurrency("concurrency", spec.concurrency)?;

    for limit in &spec.rate_limits {
        validate_domain_string(&limit.domain)?;
        validate_bucket(&limit.domain, limit.capacity, limit.refill_per_sec)?;
    }

    for field in spec.extraction_rules.keys() {
        if field.is_empty() {
            return Err(ConfigError::Validation(
                "extraction rule field names cannot be empty".to_string(),
            ));
        }
    }

    for stage in &spec.stages {
        if let StageSpec::Validate { field, .. } = stage {
            if field.is_empty() {
                return Err(ConfigError::Validation(
                    "validate stage needs a field name".to_string(),
                ));
            }
        }
    }

    let extracts = spec
        .stages
        .iter()
        .any(|stage| matches!(stage, StageSpec::Extract));
    if extracts && spec.extraction_rules.is_empty() {
        return Err(ConfigError::Validation(
            "extract stage requires at least one extraction rule".to_string(),
        ));
    }

    Ok(())
}

/// Validates an uploaded credential
pub fn validate_credential_spec(spec: &CredentialSpec) -> Result<(), ConfigError> {
    validate_domain_string(&spec.scope)?;

    if spec.payload.is_empty() {
        return Err(ConfigError::Validation(format!(
            "credential for '{}' has an empty payload",
            spec.scope
        )));
    }

    if spec.kind == CredentialKind::Cookie
        && reqwest::header::HeaderValue::from_str(&spec.payload).is_err()
    {
        return Err(ConfigError::Validation(format!(
            "cookie for '{}' is not a valid header value",
            spec.scope
        )));
    }

    if spec.kind == CredentialKind::Proxy {
        let proxy = Url::parse(&spec.payload).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy URL for '{}': {}", spec.scope, e))
        })?;
        if !matches!(proxy.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::InvalidUrl(format!(
                "Unsupported proxy scheme '{}' for '{}'",
                proxy.scheme(),
                spec.scope
            )));
        }
    }

    Ok(())
}

fn validate_concurrency(name: &str, value: u32) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_CONCURRENCY, value
        )));
    }
    Ok(())
}

fn validate_bucket(name: &str, capacity: u32, refill_per_sec: f64) -> Result<(), ConfigError> {
    if capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "rate bucket '{}' must have capacity >= 1",
            name
        )));
    }

    if !(refill_per_sec > 0.0) || !refill_per_sec.is_finite() {
        return Err(ConfigError::Validation(format!(
            "rate bucket '{}' must refill at a positive rate, got {}",
            name, refill_per_sec
        )));
    }

    Ok(())
}

/// Validates a bare domain name such as a credential scope
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::Validation("Domain cannot be empty".to_string()));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if domain.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' must be lowercase",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
