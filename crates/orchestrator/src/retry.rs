use crate::actions::{ActionError, ActionKind};
use perp_guard_core::{GatewayError, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Bounded, jittered exponential backoff for gateway calls.
///
/// Transient errors are retried up to `max_attempts` total attempts;
/// structural errors return on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// Uniform in `[d/2, d]` where `d = base * 2^(attempt-1)`, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }

    /// Runs `op` until it succeeds, fails structurally, or the attempt budget is spent.
    ///
    /// # Errors
    /// `Structural` for non-retryable failures, `RetriesExhausted` otherwise.
    pub async fn run<T, F, Fut>(
        &self,
        symbol: &str,
        action: ActionKind,
        mut op: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_structural() => {
                    error!(symbol = %symbol, action = %action, attempt, error = %e, "Non-retryable gateway error");
                    return Err(ActionError::Structural {
                        symbol: symbol.to_string(),
                        action,
                        source: e,
                    });
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!(symbol = %symbol, action = %action, attempt, error = %e, "Retry budget exhausted");
                    return Err(ActionError::RetriesExhausted {
                        symbol: symbol.to_string(),
                        action,
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let mut delay = self.backoff(attempt);
                    if let GatewayError::RateLimited { retry_after_ms } = e {
                        delay = delay.max(Duration::from_millis(retry_after_ms));
                    }
                    warn!(
                        symbol = %symbol,
                        action = %action,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Gateway call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn backoff_is_jittered_and_capped() {
        let p = policy();
        for _ in 0..50 {
            let first = p.backoff(1);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
            let late = p.backoff(6);
            assert!(late >= Duration::from_millis(125) && late <= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy()
            .run("BTC", ActionKind::Open, move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::network("reset"))
                } else {
                    Ok("tx-1")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "tx-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn structural_error_aborts_without_retry() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy()
            .run("BTC", ActionKind::Open, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::ZeroSize { symbol: "BTC".into() })
            })
            .await;
        assert!(matches!(result, Err(ActionError::Structural { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = policy()
            .run("ETH", ActionKind::Close, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Timeout("slow".into()))
            })
            .await;
        assert!(matches!(
            result,
            Err(ActionError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
