use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::error::VoiceError;

/// Bounded retry allowance for one outbound call.
///
/// Created per call, consumed by exponential backoff, discarded after
/// success or exhaustion. The delay doubles on every spent attempt:
/// base, 2x base, 4x base, ...
#[derive(Debug)]
pub struct RetryBudget {
    attempts_remaining: u32,
    base_delay: Duration,
    attempt: u32,
}

impl RetryBudget {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts_remaining: attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            attempt: 0,
        }
    }

    /// Spend one attempt. Returns the delay to wait before the next try,
    /// or `None` when the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts_remaining <= 1 {
            return None;
        }
        self.attempts_remaining -= 1;
        let delay = self.base_delay * 2u32.pow(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }
}

/// Run an async operation under a retry budget.
///
/// Only transient failures ([`VoiceError::is_transient`]) spend budget;
/// anything else returns immediately. The last error is returned once the
/// budget runs out.
pub async fn with_retry<T, F, Fut>(
    mut budget: RetryBudget,
    operation: &str,
    mut f: F,
) -> Result<T, VoiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VoiceError>>,
{
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match budget.next_delay() {
                Some(delay) => {
                    warn!(operation, delay_ms = delay.as_millis() as u64, %err, "transient failure, retrying");
                    sleep(delay).await;
                }
                None => {
                    warn!(operation, %err, "retry budget exhausted");
                    return Err(err);
                }
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_budget_delays_double() {
        let mut budget = RetryBudget::new(3, 1000);
        assert_eq!(budget.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(budget.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(budget.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_budget() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), VoiceError> =
            with_retry(RetryBudget::new(3, 1000), "transcribe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(VoiceError::Transport {
                        endpoint: "/transcribe".into(),
                        message: "timeout".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial + 2 retries");
        // Backoff slept 1x then 2x the base delay.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), VoiceError> =
            with_retry(RetryBudget::new(3, 10), "transcribe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(VoiceError::TranscriptionFailed {
                        status: 400,
                        body: "bad audio".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = with_retry(RetryBudget::new(3, 10), "transcribe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VoiceError::Transport {
                        endpoint: "/transcribe".into(),
                        message: "502".into(),
                    })
                } else {
                    Ok("hello")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
