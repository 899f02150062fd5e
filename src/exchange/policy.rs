use super::ExchangeError;
use crate::config::BackoffKind;
use std::time::Duration;

/// Decides which failures are worth another attempt.
pub type RetryPredicate = fn(ExchangeError) -> bool;

/// Transient failures: the service may answer on the next attempt.
pub fn default_retryable(err: ExchangeError) -> bool {
    matches!(
        err,
        ExchangeError::ServiceUnavailable | ExchangeError::Timeout
    )
}

/// Bounded retry with a pluggable delay curve and retryable-failure predicate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
    pub retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_EXCHANGE_RETRIES,
            Duration::from_millis(crate::config::DEFAULT_RETRY_BASE_DELAY_MS),
            BackoffKind::Linear,
        )
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff: BackoffKind) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
            retryable: default_retryable,
        }
    }

    pub fn with_predicate(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn should_retry(&self, err: ExchangeError, attempt: u32) -> bool {
        attempt < self.max_attempts() && (self.retryable)(err)
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffKind::Linear => self.base_delay.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }
}
