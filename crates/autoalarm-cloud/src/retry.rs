use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Linear-incrementing backoff: attempt `n` is preceded by a wait of
/// `initial_delay + increment * (n - 1)`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub increment: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            increment: Duration::from_secs(2),
        }
    }
}

impl LinearBackoff {
    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay + self.increment * retry.saturating_sub(1)
    }

    /// Runs `op` until it succeeds or `max_attempts` calls have failed, then
    /// returns the last error.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_when(what, op, |_| true).await
    }

    /// Like [`retry`](Self::retry), but errors for which `retryable` is
    /// false are returned immediately.
    pub async fn retry_when<T, E, F, Fut, P>(
        &self,
        what: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(operation = what, attempts = attempt, error = %e, "Operation failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn backoff() -> LinearBackoff {
        LinearBackoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            increment: Duration::from_millis(500),
        }
    }

    #[test]
    fn should_grow_delay_linearly() {
        let b = backoff();
        assert_eq!(b.delay_for(1), Duration::from_millis(1000));
        assert_eq!(b.delay_for(2), Duration::from_millis(1500));
        assert_eq!(b.delay_for(3), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn should_succeed_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<u32, String> = backoff()
            .retry("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("failure {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_last_error_when_attempts_are_exhausted() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = backoff()
            .retry("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {n}"))
            })
            .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_retry_errors_rejected_by_predicate() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = backoff()
            .retry_when(
                "test",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                },
                |e| e != "fatal",
            )
            .await;

        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
