//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::models::CrawlerConfig;
use crate::services::FetchError;
use crate::utils::RateGate;

/// Attempt ceiling and backoff bounds for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt ceiling; expiry counts as a transient failure
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            attempt_timeout: config.timeout(),
        }
    }

    /// Sleep before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_after(&self, retry: u32, error: &FetchError) -> Duration {
        let backoff = self.backoff(retry);
        match error {
            FetchError::RateLimited {
                retry_after: Some(hint),
            } => (*hint).max(backoff).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, FetchError>,
    pub attempts: u32,
}

/// Run `op` under the policy.
///
/// Every attempt passes the gate first. Non-transient errors return
/// immediately. A started unit always runs its retry sequence to the end;
/// callers check for cancellation before starting the next unit.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &RateGate,
    mut op: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempts = 0;
    loop {
        gate.acquire().await;
        attempts += 1;

        let error = match timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Ok(Err(error)) => error,
            Err(_) => FetchError::Timeout,
        };

        if !error.is_transient() || attempts >= policy.max_attempts {
            return Attempted {
                result: Err(error),
                attempts,
            };
        }

        let delay = policy.delay_after(attempts, &error);
        log::debug!("Attempt {attempts} failed ({error}); retrying in {delay:?}");
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(16));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(64), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_hint_is_honored_within_cap() {
        let p = policy(3);
        let hinted = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(9)),
        };
        assert_eq!(p.delay_after(1, &hinted), Duration::from_secs(9));
        let huge = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(p.delay_after(1, &huge), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let gate = RateGate::unpaced();

        let counter = Arc::clone(&calls);
        let out = run_with_retry(&policy(3), &gate, || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(FetchError::Transient("reset".into())),
                    _ => Ok("ok"),
                }
            }
        })
        .await;

        assert_eq!(out.result, Ok("ok"));
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let gate = RateGate::unpaced();
        let out: Attempted<()> =
            run_with_retry(&policy(5), &gate, || async { Err(FetchError::NotFound) }).await;
        assert_eq!(out.result, Err(FetchError::NotFound));
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_capped() {
        let gate = RateGate::unpaced();
        let started = Instant::now();
        let out: Attempted<()> =
            run_with_retry(&policy(3), &gate, || async { Err(FetchError::Timeout) }).await;
        assert_eq!(out.result, Err(FetchError::Timeout));
        assert_eq!(out.attempts, 3);
        // 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_as_transient() {
        let gate = RateGate::unpaced();
        let out: Attempted<()> = run_with_retry(&policy(1), &gate, || async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(out.result, Err(FetchError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_passes_the_gate() {
        let gate = RateGate::new(Duration::from_secs(5));
        let started = Instant::now();
        let out: Attempted<()> = run_with_retry(&policy(2), &gate, || async {
            Err(FetchError::Transient("reset".into()))
        })
        .await;
        assert_eq!(out.attempts, 2);
        // 2s backoff, then the gate holds the second start until 5s
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
