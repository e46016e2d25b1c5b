//! Retry utilities for collaborator calls
//!
//! Content generation and platform adapters wrap their network calls in
//! [`with_retry_if`] so transient failures are retried with a linear or
//! exponential delay, while permanent failures (bad credentials, rejected
//! content) surface immediately.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base_delay * attempt`
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`
    #[default]
    Exponential,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,

    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Linear or exponential growth
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Switch to linear delay growth
    pub fn linear(mut self) -> Self {
        self.strategy = BackoffStrategy::Linear;
        self
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Upper bound on the total backoff across all retries
    pub fn total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut previous = Duration::ZERO;

        for attempt in 1..=self.max_retries {
            let delay = self.calculate_delay(attempt);
            // Once the delay stops growing every remaining wait is at most this one
            if delay >= Duration::from_millis(self.max_delay_ms) || (attempt > 1 && delay <= previous) {
                let remaining = self.max_retries - attempt + 1;
                let rest = delay.checked_mul(remaining).unwrap_or(Duration::MAX);
                return total.saturating_add(rest);
            }
            total = total.saturating_add(delay);
            previous = delay;
        }

        total
    }

    /// Time for every attempt at `per_attempt` each, plus the backoff between them
    pub fn time_budget(&self, per_attempt: Duration) -> Duration {
        per_attempt
            .checked_mul(self.max_retries.saturating_add(1))
            .unwrap_or(Duration::MAX)
            .saturating_add(self.total_backoff())
    }

    /// Calculate delay before a given attempt (attempt 0 is the first call)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            match self.strategy {
                BackoffStrategy::Linear => self
                    .base_delay_ms
                    .saturating_mul(u64::from(attempt))
                    .min(self.max_delay_ms),
                BackoffStrategy::Exponential => {
                    let exponential = self.base_delay_ms as f64
                        * self.backoff_multiplier.powi((attempt - 1) as i32);
                    (exponential as u64).min(self.max_delay_ms)
                }
            }
        };

        Duration::from_millis(delay_ms)
    }
}

/// Final result of a retried operation together with the number of calls made
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Execute an operation with retry logic, retrying every error
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_report(config, operation, |_| true).await.result
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Errors for which `should_retry` returns `false` are returned at once.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_with_report(config, operation, should_retry).await.result
}

/// Like [`with_retry_if`], also reporting how many calls were made
pub async fn retry_with_report<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> RetryReport<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryReport {
                    result: Ok(result),
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return RetryReport {
                        result: Err(e),
                        attempts: attempt + 1,
                    };
                }

                if attempt >= config.max_retries {
                    warn!(
                        attempts = attempt + 1,
                        error = %e,
                        "Retries exhausted"
                    );
                    return RetryReport {
                        result: Err(e),
                        attempts: attempt + 1,
                    };
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::with_delays(max_retries, 1, 5)
    }

    #[test]
    fn test_total_backoff_sums_capped_delays() {
        // 1 + 2 + 4 + 5 + 5
        assert_eq!(fast(5).total_backoff(), Duration::from_millis(17));
        assert_eq!(fast(0).total_backoff(), Duration::ZERO);

        let linear = RetryConfig::with_delays(4, 10, 25).linear();
        // 10 + 20 + 25 + 25
        assert_eq!(linear.total_backoff(), Duration::from_millis(80));
    }

    #[test]
    fn test_time_budget_saturates() {
        assert_eq!(fast(2).time_budget(Duration::from_secs(1)), Duration::from_millis(3_003));

        let huge = RetryConfig::with_delays(u32::MAX, 1_000, 30_000);
        assert_eq!(huge.time_budget(Duration::MAX), Duration::MAX);
        assert!(huge.time_budget(Duration::from_secs(30)) > Duration::from_secs(30 * 1_000_000));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let report =
            retry_with_report(&fast(3), || async { Ok::<_, String>(42) }, |_| true).await;
        assert_eq!(report.result.unwrap(), 42);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_retry(&fast(3), move || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    return Err("Simulated failure".to_string());
                }
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let report = retry_with_report(
            &fast(2),
            || async { Err::<(), _>("Permanent failure".to_string()) },
            |_| true,
        )
        .await;

        assert_eq!(report.attempts, 3);
        assert_eq!(report.result.unwrap_err(), "Permanent failure");
    }

    #[tokio::test]
    async fn test_retry_if_predicate() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), String> = with_retry_if(
            &fast(3),
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err("validation error".to_string()) }
            },
            |e| !e.contains("validation"),
        )
        .await;

        assert!(result.unwrap_err().contains("validation"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig::default();

        assert_eq!(config.calculate_delay(0), Duration::from_millis(0));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_linear_delay() {
        let config = RetryConfig::with_delays(5, 500, 1200).linear();

        assert_eq!(config.calculate_delay(1), Duration::from_millis(500));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(1200));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::with_delays(10, 1000, 5000);
        assert_eq!(config.calculate_delay(10), Duration::from_millis(5000));
    }
}
