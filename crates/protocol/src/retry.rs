//! Outcome classification and bounded retry for external calls.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Failure of a call that crosses a process boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Worth retrying: timeouts, throttling, dropped connections, 5xx.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Never retried: auth, schema and request errors.
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("cancelled")]
    Cancelled,
}

impl CallError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies an HTTP status code.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 429 || status == 408 || status >= 500 {
            Self::Transient(format!("HTTP {status}: {body}"))
        } else {
            Self::Permanent(format!("HTTP {status}: {body}"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget is spent.
    /// `op` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(CallError::Transient(message)) if attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{label}: transient failure (attempt {}), retrying in {:?}: {message}",
                        attempt + 1,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CallError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Awaits `fut` under a per-call deadline while observing cancellation.
pub async fn guarded<T, Fut>(
    deadline: Duration,
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T, CallError>
where
    Fut: Future<Output = Result<T, CallError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(CallError::Transient(format!("timed out after {}ms", deadline.as_millis()))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_at_most_twice() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let res: Result<(), _> = fast()
            .run("test", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Transient("busy".into())) }
            })
            .await;
        assert!(matches!(res, Err(CallError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let res: Result<(), _> = fast()
            .run("test", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Permanent("401".into())) }
            })
            .await;
        assert!(matches!(res, Err(CallError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let cancel = CancellationToken::new();
        let res = fast()
            .run("test", &cancel, |attempt| async move {
                if attempt == 0 {
                    Err(CallError::Transient("flaky".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(res, Ok(1));
    }

    #[tokio::test]
    async fn guarded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<(), _> = guarded(Duration::from_secs(5), &cancel, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(res, Err(CallError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_times_out_as_transient() {
        let cancel = CancellationToken::new();
        let res: Result<(), _> = guarded(Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(CallError::Transient(_))));
    }

    #[test]
    fn status_classification() {
        assert!(CallError::from_status(503, "").is_transient());
        assert!(CallError::from_status(429, "").is_transient());
        assert!(!CallError::from_status(401, "").is_transient());
    }
}
