//! Shared retry policy with exponential backoff.
//!
//! Every backend is tuned through one [`RetryPolicy`]. The policy is handed to
//! the provider client in that client's own terms where it has a retry layer
//! (AWS SDK, object_store) and drives [`retry_async`] for the requests this
//! crate issues itself.

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::{StorageError, StorageResult};

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f32,
}

impl RetryPolicy {
    /// AWS SDK standard mode.
    pub const S3_DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(20),
        multiplier: 2.0,
    };

    /// Pipeline level policy of the Azure client.
    pub const AZURE: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(800),
        max_delay: Duration::from_secs(5),
        multiplier: 2.0,
    };

    /// Retries of a single Azure block read, layered under [`Self::AZURE`].
    pub const AZURE_BLOCK: RetryPolicy = RetryPolicy {
        max_attempts: 4,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(2),
        multiplier: 2.0,
    };

    /// GCS reads and writes, retried regardless of idempotency hints.
    pub const GCP: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(5),
        multiplier: 2.0,
    };

    /// Alibaba OSS requests, applied through opendal's retry layer.
    pub const ALIOSS: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
        multiplier: 2.0,
    };

    /// Number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Backoff schedule for [`backon`].
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries() as usize)
            .with_factor(self.multiplier)
            .with_jitter()
    }

    /// The same policy as an AWS SDK standard retry config.
    #[cfg(feature = "aws")]
    pub fn to_aws(&self) -> aws_sdk_s3::config::retry::RetryConfig {
        aws_sdk_s3::config::retry::RetryConfig::standard()
            .with_max_attempts(self.max_attempts.max(1))
            .with_initial_backoff(self.initial_delay)
            .with_max_backoff(self.max_delay)
    }

    /// The same policy as an object_store retry config.
    #[cfg(any(feature = "azure", feature = "gcp"))]
    pub fn to_object_store(&self) -> object_store::RetryConfig {
        object_store::RetryConfig {
            backoff: object_store::BackoffConfig {
                init_backoff: self.initial_delay,
                max_backoff: self.max_delay,
                base: f64::from(self.multiplier),
            },
            max_retries: self.max_retries() as usize,
            retry_timeout: self.total_budget(),
        }
    }

    /// The same policy as an opendal retry layer.
    #[cfg(feature = "alioss")]
    pub fn to_opendal(&self) -> opendal::layers::RetryLayer {
        opendal::layers::RetryLayer::new()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_retries() as usize)
            .with_jitter()
    }

    /// Upper bound of the time spent sleeping between attempts.
    pub fn total_budget(&self) -> Duration {
        let mut delay = self.initial_delay;
        let mut total = Duration::ZERO;
        for _ in 0..self.max_retries() {
            total += delay;
            delay = delay.mul_f32(self.multiplier).min(self.max_delay);
        }
        // Leave room for the attempts themselves.
        total + Duration::from_secs(60)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::S3_DEFAULT
    }
}

/// Runs `operation` until it succeeds, fails with a non retryable error or
/// the policy is exhausted.
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let max_retries = policy.max_retries();
    let mut attempt = 0u32;
    let notify = |err: &StorageError, dur: Duration| {
        attempt += 1;
        warn!(
            operation = operation_name,
            attempt = attempt,
            max_retries = max_retries,
            next_delay_ms = dur.as_millis() as u64,
            error = %err,
            "Storage operation failed, will retry"
        );
    };

    operation
        .retry(policy.backoff())
        .when(StorageError::is_retryable)
        .notify(notify)
        .await
}
