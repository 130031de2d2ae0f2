//! Retry policy and the generic `with_retry` combinator.
//!
//! Detection of retryable failures is a pure predicate on [`SourceError`],
//! so call sites never inspect errors themselves.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

fn default_retryable() -> fn(&SourceError) -> bool {
    SourceError::is_retryable
}

/// Jittered exponential backoff that honours server wait hints.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random (0.0 - 1.0)
    pub jitter_pct: f64,
    #[serde(skip, default = "default_retryable")]
    retryable: fn(&SourceError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
            retryable: SourceError::is_retryable,
        }
    }

    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    /// Replace the retry predicate.
    pub fn with_predicate(mut self, retryable: fn(&SourceError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_retryable(&self, err: &SourceError) -> bool {
        (self.retryable)(err)
    }

    /// Backoff before the attempt following failed attempt number `attempt`
    /// (1-based). A server hint wins over the exponential schedule; both are
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, err: &SourceError) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        if let Some(hint) = err.retry_after() {
            return hint.min(cap);
        }

        let shift = attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);

        let jittered = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta).min(self.max_delay_ms)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 8_000, 0.2)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter_pct", &self.jitter_pct)
            .finish()
    }
}

/// Final error of an operation that `with_retry` gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: SourceError,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_attempts || !policy.is_retryable(&error) {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }

                let delay = policy.delay_for(attempt, &error);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Source call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transport() -> SourceError {
        SourceError::Transport("connection reset".to_string())
    }

    #[test]
    fn test_new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 2.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(6, 100, 500, 0.0);
        let delays: Vec<_> = (1..=5).map(|a| policy.delay_for(a, &transport())).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[test]
    fn test_server_hint_wins_but_is_capped() {
        let policy = RetryPolicy::new(3, 100, 5_000, 0.0);
        let hinted = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
            message: "slow down".into(),
        };
        assert_eq!(policy.delay_for(1, &hinted), Duration::from_secs(2));

        let greedy = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
            message: "slow down".into(),
        };
        assert_eq!(policy.delay_for(1, &greedy), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(3, 1_000, 10_000, 0.25);
        for _ in 0..100 {
            let delay = policy.delay_for(1, &transport());
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 500);
        assert!(policy.is_retryable(&transport()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::new(3, 10, 10, 0.0);
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(transport())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, 100, 1_000, 0.0);
        let start = Instant::now();

        let result: Result<(), _> =
            with_retry(&policy, "test", |_| async { Err(transport()) }).await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error, transport());
        // 100ms + 200ms of backoff between the three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let policy = RetryPolicy::new(5, 100, 1_000, 0.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::Reverted("bad call".into())) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let policy = RetryPolicy::new(4, 10, 10, 0.0).with_predicate(|_| false);
        let result: Result<(), _> =
            with_retry(&policy, "test", |_| async { Err(transport()) }).await;
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
