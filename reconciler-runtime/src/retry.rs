//! Retry logic for snapshot loading

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    None,
    Fixed,
    Exponential,
}

/// How often and how patiently a tick re-reads an external source
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            strategy: RetryStrategy::Exponential,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            strategy: RetryStrategy::None,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::None => Duration::from_secs(0),
            RetryStrategy::Fixed => self.initial_delay.min(self.max_delay),
            RetryStrategy::Exponential => {
                let delay =
                    self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.strategy != RetryStrategy::None && attempt < self.max_retries
    }

    /// Run `operation` until it succeeds or the policy gives up, returning
    /// the last error
    pub async fn run<T, E, F, Fut>(&self, operation: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |_| true, f).await
    }

    /// Like [`Self::run`], but errors rejected by `retryable` are returned
    /// immediately
    pub async fn run_if<T, E, R, F, Fut>(&self, operation: &str, retryable: R, mut f: F) -> Result<T, E>
    where
        E: Display,
        R: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if retryable(&error) && self.should_retry(attempt) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::Fixed,
            initial_delay: Duration::from_secs(5),
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(5), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_gives_up() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("unavailable".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_if_stops_on_permanent_error() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run_if(
                "corrupt",
                |error: &String| !error.starts_with("permanent"),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("permanent: bad payload".to_string())
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
