use std::collections::BTreeSet;
use std::time::Duration;

use http::StatusCode;
use rand::Rng;

/// Client-wide retry configuration. `max_attempts` counts every submission,
/// the first one included.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// One attempt, no backoff.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_ratio: 0.0,
            retryable_status_codes: default_retryable_status_codes(),
        }
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter_ratio: 0.2,
            retryable_status_codes: default_retryable_status_codes(),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Zero resubmits immediately from the completion path.
    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn configured_max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub(crate) fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    /// Delay before the `retry_index`-th resubmission (1-based).
    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [503_u16].into_iter().collect()
}

/// Attempt budget for one request, threaded through each resubmission.
///
/// Starts at `max(1, max_attempts)` remaining and only ever decreases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptState {
    max_attempts: usize,
    remaining: usize,
}

impl AttemptState {
    pub fn new(max_attempts: usize) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            remaining: max_attempts,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// 1-based number of the attempt this state describes.
    pub fn attempt_number(&self) -> usize {
        self.max_attempts - self.remaining + 1
    }

    pub fn can_retry(&self) -> bool {
        self.remaining > 1
    }

    /// State for the following attempt, or `None` when the budget is spent.
    pub fn next(self) -> Option<Self> {
        if !self.can_retry() {
            return None;
        }
        Some(Self {
            max_attempts: self.max_attempts,
            remaining: self.remaining - 1,
        })
    }
}
