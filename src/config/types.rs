use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, rename = "circuit-breaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Worker pool and fetch limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-wide ceiling on concurrent attempts across all jobs
    #[serde(rename = "max-workers")]
    pub max_workers: u32,

    /// Hard cap on one job's worker pool, whatever the job asks for
    #[serde(rename = "max-job-concurrency")]
    pub max_job_concurrency: u32,

    /// Timeout for a single network fetch (milliseconds)
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// How long an in-flight fetch may keep running after cancellation (milliseconds)
    #[serde(rename = "cancel-grace-ms")]
    pub cancel_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 32,
            max_job_concurrency: 16,
            fetch_timeout_ms: 30_000,
            cancel_grace_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Default token bucket for domains a job does not configure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    #[serde(rename = "default-capacity")]
    pub default_capacity: u32,

    #[serde(rename = "default-refill-per-sec")]
    pub default_refill_per_sec: f64,

    /// Longest a worker waits for admission before the attempt is rate limited (milliseconds)
    #[serde(rename = "max-admission-wait-ms")]
    pub max_admission_wait_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            default_capacity: 5,
            default_refill_per_sec: 2.0,
            max_admission_wait_ms: 30_000,
        }
    }
}

impl RateConfig {
    pub fn max_admission_wait(&self) -> Duration {
        Duration::from_millis(self.max_admission_wait_ms)
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Total attempts per item, first attempt included
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Retries granted to an item after a content error
    #[serde(rename = "content-error-retries")]
    pub content_error_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            max_attempts: 5,
            content_error_retries: 1,
        }
    }
}

/// Domain circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    #[serde(rename = "window-secs")]
    pub window_secs: u64,

    /// Outcomes needed in the window before the breaker may trip
    #[serde(rename = "min-samples")]
    pub min_samples: u32,

    /// The breaker trips once the abandoned fraction in the window exceeds this
    #[serde(rename = "abandon-ratio")]
    pub abandon_ratio: f64,

    #[serde(rename = "cooldown-secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            min_samples: 10,
            abandon_ratio: 0.5,
            cooldown_secs: 30,
        }
    }
}

/// Credential pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    #[serde(rename = "lease-ttl-secs")]
    pub lease_ttl_secs: u64,

    #[serde(rename = "lease-acquire-timeout-ms")]
    pub lease_acquire_timeout_ms: u64,

    #[serde(rename = "reclaim-interval-ms")]
    pub reclaim_interval_ms: u64,

    /// Consecutive 4xx responses after which a credential is marked invalid
    #[serde(rename = "invalid-after-client-errors")]
    pub invalid_after_client_errors: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 60,
            lease_acquire_timeout_ms: 5_000,
            reclaim_interval_ms: 1_000,
            invalid_after_client_errors: 3,
        }
    }
}

impl CredentialConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_acquire_timeout_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Checkpoint database location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./harvest.db".to_string(),
        }
    }
}

/// Result sink location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JSON-lines file the CLI appends clean items to
    #[serde(rename = "results-path")]
    pub results_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_path: "./results.jsonl".to_string(),
        }
    }
}

impl Config {
    /// A configuration with every section at its default, for embedding and tests
    pub fn with_user_agent(user_agent: UserAgentConfig) -> Self {
        Self {
            engine: EngineConfig::default(),
            rate: RateConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            credentials: CredentialConfig::default(),
            user_agent,
            storage: StorageConfig::default(),
            output: OutputConfig::default(),
        }
    }
}
