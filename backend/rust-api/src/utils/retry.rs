use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Realtime reconnects: many attempts, backing off to a few seconds.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            jitter_max: Some(Duration::from_millis(250)),
        }
    }

    /// Wait before retry number `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);

        match self.jitter_max {
            Some(jitter) if !jitter.is_zero() => {
                let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
                backoff + Duration::from_millis(extra)
            }
            _ => backoff,
        }
    }
}

/// Runs `f` until it succeeds, `retryable` says no, or attempts run out.
pub async fn retry_async_with_config<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut retryable: R,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 1;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt as usize >= config.max_attempts || !retryable(&e) {
                    return Err(e);
                }
                let wait = config.delay_for(attempt);
                tracing::debug!(attempt, wait_ms = wait.as_millis() as u64, "Retrying after failure");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
