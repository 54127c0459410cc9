// Retry/backoff for upstream calls; the error type decides what is retryable
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Delay used for a 429 that carries no usable `Retry-After`.
pub const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureKind {
    /// Timeouts, connection failures, 5xx.
    Retryable,
    /// HTTP 429. `retry_after` is the raw header value in seconds, if any.
    RateLimited { retry_after: Option<f64> },
    /// Retrying cannot help (malformed request, undecodable body).
    Permanent,
}

pub trait Classify {
    fn classify(&self) -> FailureKind;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Exponential delay after the zero-based `attempt` failed, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_millis(delay_ms as u64)
        } else {
            Duration::ZERO
        }
    }

    pub fn rate_limit_delay(&self, retry_after: Option<f64>) -> Duration {
        match retry_after {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                Duration::from_millis((secs * 1000.0).min(self.max_delay_ms as f64) as u64)
            }
            _ => RATE_LIMIT_FALLBACK.min(self.max_delay()),
        }
    }

    /// How long to wait before the next attempt, or `None` when the failure is final.
    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Option<Duration> {
        match kind {
            FailureKind::Retryable => Some(self.backoff_delay(attempt)),
            FailureKind::RateLimited { retry_after } => Some(self.rate_limit_delay(retry_after)),
            FailureKind::Permanent => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryingClient {
    options: RetryOptions,
}

impl RetryingClient {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    pub async fn execute<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.execute_with(label, &self.options, operation).await
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
    /// The caller only ever sees the final error, never the intermediate ones.
    pub async fn execute_with<T, E, F, Fut>(
        &self,
        label: &str,
        options: &RetryOptions,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(call = label, attempts = attempt + 1, "upstream call recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= options.max_retries {
                warn!(call = label, attempts = attempt + 1, error = %err, "upstream call failed, giving up");
                return Err(err);
            }

            let Some(delay) = options.delay_for(err.classify(), attempt) else {
                warn!(call = label, error = %err, "upstream call failed permanently, not retrying");
                return Err(err);
            };

            metrics::counter!("polysync_upstream_retries_total", "call" => label.to_string())
                .increment(1);
            warn!(
                call = label,
                attempt = attempt + 1,
                max_attempts = options.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "upstream call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug)]
    struct TestError {
        kind: FailureKind,
        attempt: u32,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test failure on attempt {}", self.attempt)
        }
    }

    impl Classify for TestError {
        fn classify(&self) -> FailureKind {
            self.kind
        }
    }

    // Calls `fail_first` times with `kind`, then succeeds. Records when each attempt started.
    fn flaky(
        kind: FailureKind,
        fail_first: u32,
        calls: Arc<AtomicU32>,
        starts: Arc<Mutex<Vec<Instant>>>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, TestError>> {
        move || {
            starts.lock().push(Instant::now());
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            if attempt < fail_first {
                std::future::ready(Err(TestError { kind, attempt }))
            } else {
                std::future::ready(Ok("done"))
            }
        }
    }

    fn gaps(starts: &[Instant]) -> Vec<u128> {
        starts.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let options = RetryOptions::default();
        assert_eq!(options.backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(options.backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(options.backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(options.backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(options.backoff_delay(4), Duration::from_millis(10_000));
        assert_eq!(options.backoff_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_rate_limit_delay_rules() {
        let options = RetryOptions::default();
        assert_eq!(options.rate_limit_delay(Some(5.0)), Duration::from_millis(5_000));
        assert_eq!(options.rate_limit_delay(Some(60.0)), Duration::from_millis(10_000));
        assert_eq!(options.rate_limit_delay(Some(0.0)), RATE_LIMIT_FALLBACK);
        assert_eq!(options.rate_limit_delay(Some(-3.0)), RATE_LIMIT_FALLBACK);
        assert_eq!(options.rate_limit_delay(Some(f64::NAN)), RATE_LIMIT_FALLBACK);
        assert_eq!(options.rate_limit_delay(None), RATE_LIMIT_FALLBACK);

        let tight = RetryOptions { max_delay_ms: 4_000, ..RetryOptions::default() };
        assert_eq!(tight.rate_limit_delay(None), Duration::from_millis(4_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_two_failures_with_exponential_gaps() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let client = RetryingClient::default();

        let result = client
            .execute(
                "flaky",
                flaky(FailureKind::Retryable, 2, calls.clone(), starts.clone()),
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gaps(&starts.lock()), vec![1_000, 2_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honours_retry_after() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let client = RetryingClient::default();
        let kind = FailureKind::RateLimited { retry_after: Some(5.0) };

        let result = client
            .execute("limited", flaky(kind, u32::MAX, calls.clone(), starts.clone()))
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(gaps(&starts.lock()), vec![5_000, 5_000, 5_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_without_header_uses_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let client = RetryingClient::new(RetryOptions { max_retries: 1, ..RetryOptions::default() });
        let kind = FailureKind::RateLimited { retry_after: None };

        let _ = client
            .execute("limited", flaky(kind, u32::MAX, calls.clone(), starts.clone()))
            .await;

        assert_eq!(gaps(&starts.lock()), vec![10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let client = RetryingClient::default();

        let result = client
            .execute(
                "bad_request",
                flaky(FailureKind::Permanent, u32::MAX, calls.clone(), starts.clone()),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let client = RetryingClient::new(RetryOptions { max_retries: 2, ..RetryOptions::default() });

        let err = client
            .execute(
                "down",
                flaky(FailureKind::Retryable, u32::MAX, calls.clone(), starts.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempt, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gaps(&starts.lock()), vec![1_000, 2_000]);
    }
}
