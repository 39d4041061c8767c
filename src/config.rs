use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("{0}")]
    Invalid(String),
}

/// Timing and batching knobs for publication and recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Upper bound on a single `send`.
    pub publish_timeout: Duration,
    /// Pause between recovery sweeps.
    pub sweep_interval: Duration,
    /// Minimum age of a pending record before the sweeper touches it.
    pub grace_period: Duration,
    /// Age after which an `InProgress` record is considered abandoned by a crashed attempt.
    pub stall_timeout: Duration,
    pub batch_size: usize,
    /// Stop retrying after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(120),
            batch_size: 100,
            max_attempts: None,
        }
    }
}

impl OutboxConfig {
    /// Load from `OUTBOX_*` environment variables, falling back to defaults, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            publish_timeout: env_millis("OUTBOX_PUBLISH_TIMEOUT_MS", defaults.publish_timeout)?,
            sweep_interval: env_millis("OUTBOX_SWEEP_INTERVAL_MS", defaults.sweep_interval)?,
            grace_period: env_millis("OUTBOX_GRACE_PERIOD_MS", defaults.grace_period)?,
            stall_timeout: env_millis("OUTBOX_STALL_TIMEOUT_MS", defaults.stall_timeout)?,
            batch_size: env_parse("OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            max_attempts: match env::var("OUTBOX_MAX_ATTEMPTS") {
                Ok(raw) => Some(parse("OUTBOX_MAX_ATTEMPTS", &raw)?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the bound for a single `send`.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the time between sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the minimum age of a pending record before the sweeper retries it.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the age at which an `InProgress` claim counts as abandoned by its owner.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the batch size (max records per sweep).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the maximum number of sends per record.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// The sweeper must not race a publish that is still allowed to finish.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".to_string()));
        }
        if self.grace_period <= self.publish_timeout {
            return Err(ConfigError::Invalid(format!(
                "grace_period ({:?}) must exceed publish_timeout ({:?})",
                self.grace_period, self.publish_timeout
            )));
        }
        if self.stall_timeout <= self.publish_timeout {
            return Err(ConfigError::Invalid(format!(
                "stall_timeout ({:?}) must exceed publish_timeout ({:?})",
                self.stall_timeout, self.publish_timeout
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_attempts must be positive".to_string()));
        }
        Ok(())
    }
}

/// Helper to load an environment variable with a default value.
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
        key: key.to_string(),
        details: e.to_string(),
    })
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + ToString,
    T::Err: std::fmt::Display,
{
    parse(key, &env_or_default(key, &default.to_string()))
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis: u64 = env_parse(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
