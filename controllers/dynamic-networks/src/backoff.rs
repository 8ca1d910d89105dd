//! # Exponential Backoff
//!
//! Provides the retry delay for pods whose reconcile pass failed.
//!
//! The delay doubles with every consecutive failure of the same pod and is
//! capped at a maximum: `min(base * 2^(n-1), max)` for the n-th failure.
//! [`RetryTracker`] keeps the failure count per pod, so one calculator is
//! shared by every key.

use crate::model::WorkloadKey;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    ///
    /// # Arguments
    ///
    /// * `base` - Delay after the first failure (typically 1s)
    /// * `max` - Cap for the sequence (typically 5m)
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retrying after `failures` consecutive failures
    ///
    /// Zero failures means no delay.
    #[must_use]
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Consecutive failures per pod, turned into requeue delays.
#[derive(Debug)]
pub struct RetryTracker {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<WorkloadKey, u32>>,
}

impl RetryTracker {
    /// Create a tracker with no failures recorded
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<WorkloadKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a failed pass of `key` and return the delay before its retry
    pub fn record_failure(&self, key: &WorkloadKey) -> Duration {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        self.backoff.delay_for_failures(*count)
    }

    /// Consecutive failures recorded for `key`
    pub fn attempts(&self, key: &WorkloadKey) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &WorkloadKey) {
        self.failures().remove(key);
    }
}
