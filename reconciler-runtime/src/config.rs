//! Daemon configuration
//!
//! Loaded from environment variables:
//!
//! ```bash
//! export RECONCILER_TICK_INTERVAL_SECS=30
//! export RECONCILER_SNAPSHOT_RETRY_ATTEMPTS=3
//! export RECONCILER_SNAPSHOT_RETRY_BACKOFF_MS=500
//! export RECONCILER_RESPECT_DATA_VERSIONS=true
//! export RECONCILER_LOG_FORMAT=json   # json|pretty
//! ```

use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::{RetryPolicy, RetryStrategy};

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(anyhow!("unknown log format '{other}', expected 'json' or 'pretty'")),
        }
    }
}

/// Configuration of the asset daemon
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Time between tick starts
    pub tick_interval: Duration,
    /// Retries of snapshot loading after the first attempt
    pub snapshot_retry_attempts: u32,
    /// Initial delay between snapshot loading attempts
    pub snapshot_retry_backoff: Duration,
    /// Compare data versions when deciding whether a parent was updated
    pub respect_data_versions: bool,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            snapshot_retry_attempts: 3,
            snapshot_retry_backoff: Duration::from_millis(500),
            respect_data_versions: true,
            log_format: LogFormat::Json,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `RECONCILER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup; unset variables
    /// keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let tick_interval = match lookup("RECONCILER_TICK_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .parse()
                    .context("RECONCILER_TICK_INTERVAL_SECS must be a whole number of seconds")?,
            ),
            None => defaults.tick_interval,
        };

        let snapshot_retry_attempts = match lookup("RECONCILER_SNAPSHOT_RETRY_ATTEMPTS") {
            Some(value) => value
                .parse()
                .context("RECONCILER_SNAPSHOT_RETRY_ATTEMPTS must be a non-negative integer")?,
            None => defaults.snapshot_retry_attempts,
        };

        let snapshot_retry_backoff = match lookup("RECONCILER_SNAPSHOT_RETRY_BACKOFF_MS") {
            Some(value) => Duration::from_millis(
                value
                    .parse()
                    .context("RECONCILER_SNAPSHOT_RETRY_BACKOFF_MS must be a whole number of milliseconds")?,
            ),
            None => defaults.snapshot_retry_backoff,
        };

        let respect_data_versions = match lookup("RECONCILER_RESPECT_DATA_VERSIONS") {
            Some(value) => value
                .parse()
                .context("RECONCILER_RESPECT_DATA_VERSIONS must be 'true' or 'false'")?,
            None => defaults.respect_data_versions,
        };

        let log_format = match lookup("RECONCILER_LOG_FORMAT") {
            Some(value) => value.parse().context("Invalid RECONCILER_LOG_FORMAT")?,
            None => defaults.log_format,
        };

        let config = Self {
            tick_interval,
            snapshot_retry_attempts,
            snapshot_retry_backoff,
            respect_data_versions,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick_interval must be positive"));
        }
        if self.snapshot_retry_backoff > self.tick_interval {
            return Err(anyhow!(
                "snapshot_retry_backoff ({:?}) cannot exceed tick_interval ({:?})",
                self.snapshot_retry_backoff,
                self.tick_interval
            ));
        }
        Ok(())
    }

    /// Retry policy for snapshot loading, capped at one tick interval
    pub fn snapshot_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.snapshot_retry_attempts,
            initial_delay: self.snapshot_retry_backoff,
            max_delay: self.tick_interval,
            strategy: if self.snapshot_retry_attempts == 0 {
                RetryStrategy::None
            } else {
                RetryStrategy::Exponential
            },
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = DaemonConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert!(config.respect_data_versions);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_overrides() {
        let config = DaemonConfig::from_lookup(lookup(&[
            ("RECONCILER_TICK_INTERVAL_SECS", "5"),
            ("RECONCILER_SNAPSHOT_RETRY_ATTEMPTS", "0"),
            ("RECONCILER_RESPECT_DATA_VERSIONS", "false"),
            ("RECONCILER_LOG_FORMAT", "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert!(!config.respect_data_versions);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.snapshot_retry_policy().should_retry(0));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(DaemonConfig::from_lookup(lookup(&[("RECONCILER_TICK_INTERVAL_SECS", "soon")])).is_err());
        assert!(DaemonConfig::from_lookup(lookup(&[("RECONCILER_TICK_INTERVAL_SECS", "0")])).is_err());
        assert!(DaemonConfig::from_lookup(lookup(&[("RECONCILER_RESPECT_DATA_VERSIONS", "yes")])).is_err());
        assert!(DaemonConfig::from_lookup(lookup(&[("RECONCILER_LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn test_backoff_cannot_exceed_interval() {
        let config = DaemonConfig {
            tick_interval: Duration::from_secs(1),
            snapshot_retry_backoff: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
