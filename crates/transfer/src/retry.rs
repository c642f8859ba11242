// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use backon::BackoffBuilder;
use bon::Builder;
use fileflow_error::ClassifiedError;
use rand::Rng;

use crate::error::RequestError;

/// Decides whether a failed attempt may be repeated.
pub type RetryPredicate = fn(&RequestError) -> bool;

/// HTTP statuses worth another attempt: 408, 425, 429 and every 5xx.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

fn classified_retryable(err: &RequestError) -> bool { err.is_retryable() }

/// Attempt budget, deadline and backoff schedule for one logical request.
#[derive(Debug, Clone, Copy, Builder)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[builder(default = 3)]
    pub max_attempts:    usize,
    #[builder(default = Duration::from_millis(400))]
    pub base_delay:      Duration,
    #[builder(default = Duration::from_millis(2500))]
    pub max_delay:       Duration,
    /// Upper bound of the uniform random jitter added to every delay.
    #[builder(default = Duration::from_millis(150))]
    pub jitter:          Duration,
    /// Deadline for a single attempt.
    #[builder(default = Duration::from_secs(10))]
    pub timeout:         Duration,
    #[builder(default = classified_retryable as RetryPredicate)]
    pub retry_predicate: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::control() }
}

impl RetryPolicy {
    /// Chunk upload and download.
    #[must_use]
    pub fn chunk() -> Self {
        Self::builder()
            .max_attempts(4)
            .timeout(Duration::from_secs(18))
            .build()
    }

    /// Access code, done notification, peer configuration, signaling relay.
    #[must_use]
    pub fn control() -> Self { Self::builder().build() }

    /// Status polling.
    #[must_use]
    pub fn status() -> Self {
        Self::builder()
            .max_attempts(2)
            .timeout(Duration::from_secs(6))
            .build()
    }

    #[must_use]
    pub fn should_retry(&self, err: &RequestError) -> bool { (self.retry_predicate)(err) }

    /// `min(base * 2^(attempt-1), max)`, attempts counted from 1.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay to sleep after the given failed attempt, jitter included.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ns = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        let jitter = if jitter_ns == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rand::rng().random_range(0..=jitter_ns))
        };
        self.base_delay_for(attempt) + jitter
    }
}

/// Delays between attempts of one [`RetryPolicy`]; yields
/// `max_attempts - 1` values.
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy:  RetryPolicy,
    attempt: u32,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let attempts = usize::try_from(self.attempt).unwrap_or(usize::MAX);
        if attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff {
            policy:  self,
            attempt: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_status_set() {
        for status in [408, 425, 429, 500, 503, 599] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 206, 400, 401, 403, 404, 409, 600] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn base_delay_doubles_until_capped() {
        let policy = RetryPolicy::control();
        let expected = [400, 800, 1600, 2500, 2500, 2500];
        for (attempt, millis) in (1..).zip(expected) {
            assert_eq!(
                policy.base_delay_for(attempt),
                Duration::from_millis(millis),
                "attempt {attempt}"
            );
        }
        for attempt in 1..64 {
            assert!(policy.base_delay_for(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy::chunk();
        for attempt in 1..=4 {
            let base = policy.base_delay_for(attempt);
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base + policy.jitter);
            }
        }
    }

    #[test]
    fn backoff_yields_one_delay_per_retry() {
        assert_eq!(RetryPolicy::chunk().build().count(), 3);
        assert_eq!(RetryPolicy::status().build().count(), 1);
        let single = RetryPolicy::builder().max_attempts(1).build();
        assert_eq!(single.build().count(), 0);
    }

    #[test]
    fn presets() {
        assert_eq!(RetryPolicy::chunk().timeout, Duration::from_secs(18));
        assert_eq!(RetryPolicy::control().max_attempts, 3);
        assert_eq!(RetryPolicy::status().timeout, Duration::from_secs(6));
    }
}
