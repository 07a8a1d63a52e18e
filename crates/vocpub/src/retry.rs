//! Shared retry utilities for GitHub operations.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use thiserror::Error;

/// Initial backoff delay.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;
/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF_MS: u64 = 60_000;
/// Retries after the first attempt.
pub const MAX_RETRIES: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    #[serde(with = "millis")]
    pub min_delay: Duration,
    /// Maximum delay between retries.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Config files give delays in milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Why a retried operation finally gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error was not worth retrying.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => e,
        }
    }
}

/// Execute an operation, retrying transient failures with exponential backoff.
///
/// `is_transient` decides whether an error is retried. Permanent errors are
/// returned on the first occurrence; a transient error that survives the
/// configured number of retries comes back as [`RetryError::Exhausted`].
pub async fn with_retry<T, E, F, Fut, IsTransient, ShortMsg>(
    mut operation: F,
    config: &RetryConfig,
    is_transient: IsTransient,
    short_message: ShortMsg,
    label: &str,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    IsTransient: Fn(&E) -> bool,
    ShortMsg: Fn(&E) -> String,
{
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    let result = retry_op
        .retry(config.clone().into_backoff())
        .notify(|err, dur| {
            tracing::debug!(
                operation = label,
                attempt = attempt.load(Ordering::SeqCst),
                retry_in_ms = dur.as_millis() as u64,
                "Transient failure, retrying: {}",
                short_message(err)
            );
        })
        .when(|e| is_transient(e))
        .await;

    result.map_err(|err| {
        if is_transient(&err) {
            RetryError::Exhausted {
                attempts: attempt.load(Ordering::SeqCst),
                last: err,
            }
        } else {
            RetryError::Permanent(err)
        }
    })
}
