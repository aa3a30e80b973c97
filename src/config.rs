//! Runtime configuration for the queue and its worker.
//!
//! Values come from `SIMQUEUE_*` environment variables; anything unset keeps
//! its default. [`QueueConfig::from_lookup`] takes the lookup as a closure so
//! tests never touch the process environment.

use crate::queue::{
    domain::RetryPolicy,
    services::{DEFAULT_MAX_ATTEMPTS, QueuePolicy, WorkerSettings},
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Database URL.
pub const DATABASE_URL_VAR: &str = "SIMQUEUE_DATABASE_URL";
/// Connection pool size.
pub const POOL_SIZE_VAR: &str = "SIMQUEUE_POOL_SIZE";
/// Worker poll interval in milliseconds.
pub const POLL_INTERVAL_VAR: &str = "SIMQUEUE_POLL_INTERVAL_MS";
/// Tasks claimed per tick.
pub const CLAIM_LIMIT_VAR: &str = "SIMQUEUE_CLAIM_LIMIT";
/// Attempt budget for new tasks.
pub const MAX_ATTEMPTS_VAR: &str = "SIMQUEUE_MAX_ATTEMPTS";
/// Base retry delay in seconds.
pub const RETRY_BASE_VAR: &str = "SIMQUEUE_RETRY_BASE_SECS";
/// Reconciliation delay in seconds.
pub const RECONCILE_DELAY_VAR: &str = "SIMQUEUE_RECONCILE_DELAY_SECS";
/// Minimum cleanup retention in days.
pub const MIN_RETENTION_VAR: &str = "SIMQUEUE_MIN_RETENTION_DAYS";
/// Audit and event channel capacity.
pub const CHANNEL_CAPACITY_VAR: &str = "SIMQUEUE_CHANNEL_CAPACITY";

/// Errors raised while reading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable holds a value that does not parse.
    #[error("{name} has invalid value '{value}'")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// A variable that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// No database URL was configured.
    #[error("{DATABASE_URL_VAR} is not set")]
    MissingDatabaseUrl,
}

/// Queue and worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// `PostgreSQL` connection URL.
    pub database_url: Option<String>,
    /// Connection pool size.
    pub pool_size: u32,
    /// Delay between worker ticks.
    pub poll_interval: Duration,
    /// Most tasks claimed per tick.
    pub claim_limit: usize,
    /// Attempt budget for new tasks.
    pub default_max_attempts: u32,
    /// Base retry delay.
    pub retry_base: Duration,
    /// Delay before the mirror is refreshed after a provider write.
    pub reconcile_delay: Duration,
    /// Shortest retention accepted by cleanup.
    pub min_retention_days: u32,
    /// Capacity of the audit channel and the event fan-out.
    pub channel_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: 8,
            poll_interval: Duration::from_secs(1),
            claim_limit: 50,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: Duration::from_secs(60),
            reconcile_delay: Duration::from_secs(15),
            min_retention_days: 7,
            channel_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a set variable is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a present value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());
        Ok(Self {
            database_url,
            pool_size: positive(&lookup, POOL_SIZE_VAR, defaults.pool_size)?,
            poll_interval: Duration::from_millis(positive(
                &lookup,
                POLL_INTERVAL_VAR,
                millis(defaults.poll_interval),
            )?),
            claim_limit: positive(&lookup, CLAIM_LIMIT_VAR, defaults.claim_limit)?,
            default_max_attempts: positive(
                &lookup,
                MAX_ATTEMPTS_VAR,
                defaults.default_max_attempts,
            )?,
            retry_base: Duration::from_secs(positive(
                &lookup,
                RETRY_BASE_VAR,
                defaults.retry_base.as_secs(),
            )?),
            reconcile_delay: Duration::from_secs(parse_or(
                &lookup,
                RECONCILE_DELAY_VAR,
                defaults.reconcile_delay.as_secs(),
            )?),
            min_retention_days: parse_or(&lookup, MIN_RETENTION_VAR, defaults.min_retention_days)?,
            channel_capacity: positive(&lookup, CHANNEL_CAPACITY_VAR, defaults.channel_capacity)?,
        })
    }

    /// Returns the database URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDatabaseUrl`] when none is configured.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Builds the queue service policy.
    #[must_use]
    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            default_max_attempts: self.default_max_attempts,
            min_retention: chrono::Duration::days(i64::from(self.min_retention_days)),
        }
    }

    /// Builds the worker settings.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        let defaults = WorkerSettings::default();
        WorkerSettings {
            poll_interval: self.poll_interval,
            claim_limit: self.claim_limit,
            retry: RetryPolicy::new(to_chrono(self.retry_base)),
            reconcile_delay: to_chrono(self.reconcile_delay),
            ..defaults
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.clone(),
    })
}

fn positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    let value = parse_or(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Zero(name));
    }
    Ok(value)
}
