use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Waits for the given duration. Swappable so tests do not sleep.
pub type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn tokio_sleeper() -> Sleeper {
    Arc::new(|duration| Box::pin(tokio::time::sleep(duration)))
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = if max.is_zero() { Duration::from_secs(1) } else { max };
        let base = if base.is_zero() { Duration::from_secs(1) } else { base };
        Self {
            base: base.min(max),
            max,
        }
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(120))
    }
}

/// Uniform in `[backoff / 2, backoff]`.
pub fn jittered(backoff: Duration) -> Duration {
    let half = backoff / 2;
    if half.is_zero() {
        return backoff;
    }
    rand::thread_rng().gen_range(half..=backoff)
}

/// Retries an operation with jittered exponential backoff until it succeeds
/// or the token is cancelled.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: tokio_sleeper(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        mut op: F,
    ) -> Result<T, Cancelled>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut backoff = self.policy.base;
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let wait = jittered(backoff);
                    warn!(
                        operation = label,
                        attempt,
                        retry_in_ms = wait.as_millis() as u64,
                        error = %err,
                        "Operation failed; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Cancelled),
                        _ = (self.sleeper)(wait) => {}
                    }
                    backoff = self.policy.next_backoff(backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn recording_sleeper() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = waits.clone();
        let sleeper: Sleeper = Arc::new(move |duration| {
            recorded.lock().unwrap().push(duration);
            Box::pin(async {})
        });
        (sleeper, waits)
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(5));
        let mut backoff = policy.base;
        let mut seen = vec![backoff];
        for _ in 0..4 {
            backoff = policy.next_backoff(backoff);
            seen.push(backoff);
        }
        assert_eq!(
            seen,
            [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn policy_clamps_base_to_max() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(3));
        assert_eq!(policy.base, Duration::from_secs(3));

        let zero = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(zero.base, Duration::from_secs(1));
        assert_eq!(zero.max, Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_window() {
        for _ in 0..200 {
            let wait = jittered(Duration::from_secs(8));
            assert!(wait >= Duration::from_secs(4));
            assert!(wait <= Duration::from_secs(8));
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (sleeper, waits) = recording_sleeper();
        let retrier = Retrier::new(RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(2)))
            .with_sleeper(sleeper);
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let value = retrier
            .run(&CancellationToken::new(), "test", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("boom")
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let waits = waits.lock().unwrap();
        assert_eq!(waits.len(), 2);
        assert!(waits[0] >= Duration::from_millis(500) && waits[0] <= Duration::from_secs(1));
        assert!(waits.iter().all(|w| *w <= Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn cancellation_aborts_wait() {
        let cancel = CancellationToken::new();
        let retrier = Retrier::new(RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(60)));
        let attempts = AtomicU32::new(0);

        let canceller = cancel.clone();
        let result: Result<(), Cancelled> = retrier
            .run(&cancel, "test", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                canceller.cancel();
                async { Err::<(), _>("unreachable") }
            })
            .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_skips_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = Retrier::new(RetryPolicy::default())
            .run(&cancel, "test", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
