//! Retry decisions as a pure function of (attempt, identity, elapsed).
//!
//! The fetcher owns the I/O; this module only says what to do next, which
//! keeps backoff arithmetic testable without a clock or a network.
use std::time::Duration;

/// Backoff and budget for one fetch-then-retry sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total requests allowed, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
    /// Wall-clock budget for the whole sequence
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            jitter: Duration::from_millis(750),
            budget: Duration::from_secs(120),
        }
    }
}

/// Where a fetch sequence stands after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far (1 after the first request)
    pub attempt: u32,
    /// Index into the identity pool used by the last attempt
    pub identity: usize,
    pub elapsed: Duration,
}

/// How the last attempt ended, stripped of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Blocked by the origin or a transient network fault
    Retryable,
    /// Retrying cannot help (e.g. 404, oversized body)
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Succeed,
    RetryWith { identity: usize, delay: Duration },
    Fail,
}

impl RetryPolicy {
    /// Decide the next step. `jitter_sample` is expected in `[0, 1)` and is
    /// clamped otherwise.
    pub fn decide(
        &self,
        state: &RetryState,
        outcome: Classification,
        pool_size: usize,
        jitter_sample: f64,
    ) -> Decision {
        match outcome {
            Classification::Success => Decision::Succeed,
            Classification::Fatal => Decision::Fail,
            Classification::Retryable => {
                if state.attempt >= self.max_attempts {
                    return Decision::Fail;
                }
                let delay = self.backoff(state.attempt, jitter_sample);
                if state.elapsed.saturating_add(delay) > self.budget {
                    return Decision::Fail;
                }
                Decision::RetryWith {
                    identity: (state.identity + 1) % pool_size.max(1),
                    delay,
                }
            }
        }
    }

    /// Delay before attempt `attempt + 1`: `base * 2^(attempt-1)` capped at
    /// `max_delay`, plus up to `jitter`.
    pub fn backoff(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let exponential = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);
        let sample = if jitter_sample.is_finite() {
            jitter_sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        exponential.saturating_add(self.jitter.mul_f64(sample))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter: Duration::from_millis(50),
            budget: Duration::from_secs(60),
        }
    }

    fn state(attempt: u32, identity: usize) -> RetryState {
        RetryState {
            attempt,
            identity,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_success_and_fatal_short_circuit() {
        let p = policy();
        assert_eq!(p.decide(&state(1, 0), Classification::Success, 7, 0.0), Decision::Succeed);
        assert_eq!(p.decide(&state(1, 0), Classification::Fatal, 7, 0.0), Decision::Fail);
    }

    #[test]
    fn test_retry_rotates_identity() {
        let p = policy();
        assert_eq!(
            p.decide(&state(1, 6), Classification::Retryable, 7, 0.0),
            Decision::RetryWith {
                identity: 0,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            p.decide(&state(2, 3), Classification::Retryable, 7, 0.0),
            Decision::RetryWith {
                identity: 4,
                delay: Duration::from_millis(200)
            }
        );
    }

    #[test]
    fn test_fails_once_attempts_exhausted() {
        let p = policy();
        assert!(matches!(
            p.decide(&state(4, 0), Classification::Retryable, 7, 0.0),
            Decision::RetryWith { .. }
        ));
        assert_eq!(p.decide(&state(5, 0), Classification::Retryable, 7, 0.0), Decision::Fail);
    }

    #[test]
    fn test_fails_when_budget_would_be_exceeded() {
        let p = policy();
        let s = RetryState {
            attempt: 1,
            identity: 0,
            elapsed: Duration::from_millis(59_950),
        };
        assert_eq!(p.decide(&s, Classification::Retryable, 7, 0.0), Decision::Fail);
    }

    #[test]
    fn test_backoff_caps_and_adds_jitter() {
        let p = policy();
        assert_eq!(p.backoff(1, 0.0), Duration::from_millis(100));
        assert_eq!(p.backoff(3, 0.0), Duration::from_millis(400));
        assert_eq!(p.backoff(10, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.backoff(1, 0.5), Duration::from_millis(125));
        assert_eq!(p.backoff(1, 7.0), Duration::from_millis(150));
        assert_eq!(p.backoff(1, f64::NAN), Duration::from_millis(100));
        // Huge attempt numbers must not overflow
        assert_eq!(p.backoff(u32::MAX, 0.0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_empty_pool_does_not_divide_by_zero() {
        let p = policy();
        assert!(matches!(
            p.decide(&state(1, 0), Classification::Retryable, 0, 0.0),
            Decision::RetryWith { identity: 0, .. }
        ));
    }
}
