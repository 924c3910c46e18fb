//! Exponential backoff retry for fallible async operations.
//!
//! Used by the conversion invoker (a recipe's `retry_attempts`) and by the
//! cache client. Whether an error is worth retrying is decided by the caller,
//! so a converter timeout can be abandoned immediately while a non-zero exit
//! gets another attempt.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Retry policy: how many extra attempts and how long to wait between them.
#[derive(Clone)]
pub struct Backoff {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Initial delay between retries (doubles with each attempt).
    pub base_delay: Duration,
    /// Cap on the delay before jitter.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub jitter: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or retries run out.
    ///
    /// Each failed attempt is logged with its elapsed time. Between attempts
    /// the task sleeps for `min(base_delay * 2^(attempt-1), max_delay)` plus
    /// a random jitter.
    ///
    /// # Arguments
    ///
    /// * `label` - Short description used in log messages (e.g. `convert economist`)
    /// * `op` - Produces a fresh future for every attempt
    /// * `retryable` - Decides whether an error is worth another attempt
    ///
    /// # Returns
    ///
    /// The first successful value.
    ///
    /// # Errors
    ///
    /// The last error, once `retryable` rejects it or `max_retries` retries
    /// have been spent.
    #[instrument(level = "debug", skip_all, fields(%label))]
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if !retryable(&e) || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "{label} failed; giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "{label} failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> Backoff {
        Backoff {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = quick(2)
            .run(
                "op",
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = quick(1)
            .run(
                "op",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("nope".to_string())
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = quick(5)
            .run(
                "op",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("timeout".to_string())
                },
                |e| e != "timeout",
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = quick(10);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2));
        assert_eq!(backoff.delay_for(8), Duration::from_millis(5));
    }
}
