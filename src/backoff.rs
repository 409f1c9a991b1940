//! Retry Backoff
//!
//! Capped exponential backoff with jitter, plus a bounded retry helper
//! used for coordination service calls.

use std::future::Future;
use std::time::Duration;
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::Result;

/// Exponential backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a new backoff starting at `initial` and capped at `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max: max.max(initial),
        }
    }

    /// Create a backoff from retry configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_backoff(), config.max_backoff())
    }

    /// Delay to sleep before the next attempt; advances the state
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.as_millis() as u64;
        // Jitter is bounded to half the current backoff + 1
        let max_jitter = base.saturating_div(2).saturating_add(1);
        let jitter = rand::thread_rng().gen_range(0..max_jitter);

        self.current = self.current.saturating_mul(2).min(self.max);

        Duration::from_millis(base.saturating_add(jitter))
    }

    /// Start over from the initial delay (after a success)
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Current base delay, without jitter
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` attempts have been made.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    config: &RetryConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::from_config(config);
    let max_attempts = config.max_retries.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(151));
        assert_eq!(backoff.current(), Duration::from_millis(200));

        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_millis(300));

        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_millis(300));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 5,
        };
        let calls = AtomicU32::new(0);

        let value = retry_with_backoff("flaky", &config, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::ConnectionTimeout("zk:2181".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_session_expiry() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            max_retries: 5,
        };
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff("expired", &config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::SessionExpired)
        })
        .await;

        assert!(result.unwrap_err().is_session_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            max_retries: 3,
        };
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff("down", &config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConnectionFailed {
                address: "zk:2181".into(),
                reason: "refused".into(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
