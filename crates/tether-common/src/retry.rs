//! Retry with exponential backoff and jitter.
//!
//! Used for startup work that must eventually succeed, such as warming up the
//! extension registry while extension servers are still coming up.
//!
//! # Example
//!
//! ```ignore
//! use tether_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let configs = retry_with_backoff(
//!     &RetryConfig::with_deadline(Duration::from_secs(60)),
//!     "list_extension_configs",
//!     || async { kube.list_extension_configs().await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, warn};

/// Backoff settings for an operation that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Give up once this much time has passed since the first attempt
    pub deadline: Option<Duration>,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            deadline: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry up to `attempts` times
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Retry until `deadline` has elapsed
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Default::default()
        }
    }

    fn exhausted(&self, attempt: u32, started: Instant, next_delay: Duration) -> bool {
        if self.max_attempts > 0 && attempt >= self.max_attempts {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| started.elapsed() + next_delay > deadline)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
///
/// Delays grow by `backoff_multiplier` up to `max_delay`, each scaled by a
/// random factor in `0.5..1.5`. The last error is returned when the budget
/// runs out; a retry that would sleep past the deadline is not attempted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        if config.exhausted(attempt, started, jittered_delay) {
            error!(
                operation = %operation_name,
                attempt,
                error = %e,
                "operation failed, retry budget exhausted"
            );
            return Err(e);
        }

        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis(),
            "operation failed, retrying"
        );

        tokio::time::sleep(jittered_delay).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
