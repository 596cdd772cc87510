//! Process configuration
//!
//! Everything is read from environment variables. `DATABASE_URL` and
//! `PROXY_TABLE_NAME` are only required by commands that open the store;
//! the rest fall back to defaults.

use crate::error::{Error, Result};
use crate::proxy::checker::CheckerConfig;
use crate::proxy::feed::{FeedConfig, DEFAULT_FEED_URL};
use crate::service::SchedulerConfig;
use crate::store::sqlite::is_valid_table_name;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// sqlx URL of the store database
    pub database_url: Option<String>,
    /// Table holding the proxy records
    pub table_name: Option<String>,
    /// Number of records requested from the feed per cycle
    pub proxy_limit: usize,
    /// Delay before the next cycle after an effective one
    pub update_interval: Duration,
    pub feed_url: String,
    pub feed_timeout: Duration,
    pub fetch_max_retries: u32,
    pub fetch_retry_delay: Duration,
    pub validation_concurrency: usize,
    pub validation_timeout: Duration,
    pub validation_test_url: String,
    /// How long shutdown waits for the scheduler to stop
    pub shutdown_grace: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            database_url: var("DATABASE_URL"),
            table_name: var("PROXY_TABLE_NAME"),
            proxy_limit: parse_or(&var, "PROXY_LIMIT", 500)?,
            update_interval: Duration::from_secs(parse_or(&var, "UPDATE_INTERVAL_SECS", 60)?),
            feed_url: var("FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            feed_timeout: Duration::from_secs(parse_or(&var, "FEED_TIMEOUT_SECS", 15)?),
            fetch_max_retries: parse_or(&var, "FETCH_MAX_RETRIES", 3)?,
            fetch_retry_delay: Duration::from_secs(parse_or(&var, "FETCH_RETRY_DELAY_SECS", 3)?),
            validation_concurrency: parse_or(&var, "VALIDATION_CONCURRENCY", 500)?,
            validation_timeout: Duration::from_secs(parse_or(
                &var,
                "VALIDATION_TIMEOUT_SECS",
                10,
            )?),
            validation_test_url: var("VALIDATION_TEST_URL")
                .unwrap_or_else(|| "http://httpbin.org/ip".to_string()),
            shutdown_grace: Duration::from_secs(parse_or(&var, "SHUTDOWN_GRACE_SECS", 2)?),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(table) = &self.table_name {
            if !is_valid_table_name(table) {
                return Err(Error::config(format!(
                    "PROXY_TABLE_NAME {:?} is not a valid identifier",
                    table
                )));
            }
        }
        if self.proxy_limit == 0 {
            return Err(Error::config("PROXY_LIMIT must be > 0"));
        }
        if self.update_interval.is_zero() {
            return Err(Error::config("UPDATE_INTERVAL_SECS must be > 0"));
        }
        if self.fetch_max_retries == 0 {
            return Err(Error::config("FETCH_MAX_RETRIES must be > 0"));
        }
        if self.validation_concurrency == 0 {
            return Err(Error::config("VALIDATION_CONCURRENCY must be > 0"));
        }
        Ok(())
    }

    /// Database URL and table name, required to open the store
    pub fn store_location(&self) -> Result<(&str, &str)> {
        let url = self
            .database_url
            .as_deref()
            .ok_or_else(|| Error::config("DATABASE_URL is required"))?;
        let table = self
            .table_name
            .as_deref()
            .ok_or_else(|| Error::config("PROXY_TABLE_NAME is required"))?;
        Ok((url, table))
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig::new()
            .with_base_url(self.feed_url.clone())
            .with_timeout(self.feed_timeout)
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_timeout(self.validation_timeout)
            .with_concurrency(self.validation_concurrency)
            .with_test_url(self.validation_test_url.clone())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_proxy_limit(self.proxy_limit)
            .with_update_interval(self.update_interval)
            .with_retry(self.fetch_max_retries, self.fetch_retry_delay)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("invalid {}: {}", key, e))),
        None => Ok(default),
    }
}
