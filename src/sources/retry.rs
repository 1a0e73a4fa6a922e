//! Retry policy and backoff for upstream HTTP calls (§4.3).
//!
//! Grounded on the exponential-backoff-with-jitter pattern used for
//! reconnect scheduling elsewhere in this codebase, adapted here for a
//! request-scoped retry loop rather than a long-lived session.

use std::time::Duration;

use reqwest::StatusCode;

/// Tunables for one source's retry loop. Two retries by default: the first
/// retry absorbs a blip, the second absorbs a slow failover; beyond that a
/// struggling backend should surface as a failure, not hide behind latency.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_ms: 100,
            max_ms: 5_000,
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

/// `true` when a response status warrants a retry: only 5xx (§4.3 — 4xx is
/// a permanent rejection of the request as formed, except the cluster/
/// single-node path fallback handled separately in `transport.rs`).
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Backoff calculator with jitter, one instance per retry loop.
#[derive(Debug)]
pub struct BackoffCalculator {
    policy: RetryPolicy,
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64 | 1)
                .unwrap_or(12345),
        }
    }

    /// Fast PRNG for jitter (xorshift64). Not cryptographic; only needs to
    /// avoid correlated sleeps across concurrently-retrying callers.
    #[inline]
    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    pub fn next_backoff(&mut self) -> Duration {
        let base =
            (self.policy.base_ms as f64) * self.policy.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.policy.max_ms as f64);

        let jitter_range = capped * self.policy.jitter_factor;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.policy.base_ms as f64);

        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::OK));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut calc = BackoffCalculator::new(RetryPolicy {
            max_attempts: 5,
            base_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        });
        let first = calc.next_backoff().as_millis();
        let second = calc.next_backoff().as_millis();
        assert!(second >= first);
        for _ in 0..10 {
            assert!(calc.next_backoff().as_millis() <= 1_000);
        }
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let mut calc = BackoffCalculator::new(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        assert!(!calc.exhausted());
        calc.next_backoff();
        calc.next_backoff();
        assert!(calc.exhausted());
    }
}
