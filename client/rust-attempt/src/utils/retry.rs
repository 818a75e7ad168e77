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
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

impl RetryConfig {
    /// Backoff used by long-lived connections: unbounded attempts, slow growth.
    pub fn reconnect(base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: usize::MAX,
            base_backoff,
            max_backoff,
            jitter_max: Some(base_backoff / 2),
        }
    }
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped,
/// plus random jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    let backoff = std::cmp::min(
        config.base_backoff.saturating_mul(factor),
        config.max_backoff,
    );

    match config.jitter_max {
        Some(jitter_max) => {
            let jitter_ms = jitter_max.as_millis() as u64;
            let extra = if jitter_ms == 0 {
                0
            } else {
                rand::random::<u64>() % (jitter_ms + 1)
            };
            backoff + Duration::from_millis(extra)
        }
        None => backoff,
    }
}

pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_if(config, |_| true, f).await
}

/// Like [`retry_async_with_config`], but gives up at once on errors that
/// `should_retry` rejects.
pub async fn retry_async_if<F, Fut, T, E, P>(
    config: RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 || !should_retry(&e) {
                    return Err(e);
                }

                let wait = backoff_delay(&config, attempt);
                tracing::debug!(error = %e, attempt, ?wait, "Retrying after failure");
                tokio::time::sleep(wait).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
