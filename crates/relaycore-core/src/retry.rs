// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff for step redelivery and provider retries.

use std::time::Duration;

/// `min(retry_max, retry_base * 2^(attempt-1))`, attempt is 1-indexed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: i32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            base,
            max,
        }
    }

    /// Backoff delay before the given attempt number is redelivered.
    /// `attempt` is the attempt that just failed (1-indexed).
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = (attempt - 1).max(0) as u32;
        let scaled = self.base.as_secs_f64() * 2f64.powi(exponent as i32);
        let capped = scaled.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn should_retry(&self, attempt: i32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
