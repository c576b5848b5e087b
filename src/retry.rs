use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

macro_rules! retry_db_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY_SECS: u64 = 3;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_DELAY_SECS)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_db_operation;

/// Bounded retry schedule for external HTTP services.
///
/// Attempt `n` (zero based) waits `backoff_factor * 2^n` seconds before the
/// next try, capped at `max_delay`, with up to 25% jitter either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.5,
            max_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and offline runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_factor: 0.0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = (self.backoff_factor * 1000.0 * 2f64.powi(attempt as i32)).max(0.0);
        let capped_ms = (base_ms as u64).min(self.max_delay.as_millis() as u64);
        let jitter_range = (capped_ms as f64 * 0.25) as u64;
        if jitter_range == 0 {
            return Duration::from_millis(capped_ms);
        }
        let jitter = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis(capped_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay_for_attempt(attempt);
                    log::debug!(
                        "{} attempt {} failed: {}. Retrying in {}ms",
                        label,
                        attempt + 1,
                        err,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} exhausted retry attempts", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(1),
        };
        let first = policy.delay_for_attempt(0).as_millis();
        assert!((750..=1250).contains(&first));
        let capped = policy.delay_for_attempt(6).as_millis();
        assert!(capped <= 3750);
        assert_eq!(RetryPolicy::immediate(3).delay_for_attempt(2), Duration::ZERO);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("flaky", &RetryPolicy::immediate(3), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("down", &RetryPolicy::immediate(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("still down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
