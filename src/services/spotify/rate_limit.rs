use std::future::Future;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::ports::spotify::{ApiResult, SpotifyApiError};

/// How to react to HTTP 429 responses.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub default_retry_after: Duration,
    pub extra_delay: Duration,
    /// `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            default_retry_after: config.default_retry_after,
            extra_delay: config.extra_delay,
            max_retries: config.max_retries,
        }
    }
}

impl RateLimitPolicy {
    fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(self.default_retry_after) + self.extra_delay
    }
}

/// Run `call` until it returns something other than [`SpotifyApiError::RateLimited`].
///
/// Each 429 sleeps for the server supplied `Retry-After` (or the policy default)
/// plus the policy's extra delay. Any other error is returned immediately.
pub async fn with_rate_limit_retry<T, F, Fut>(
    policy: &RateLimitPolicy,
    operation: &str,
    mut call: F,
) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut attempts: u32 = 0;
    loop {
        match call().await {
            Err(SpotifyApiError::RateLimited { retry_after }) => {
                attempts += 1;
                if let Some(max_retries) = policy.max_retries
                    && attempts > max_retries
                {
                    tracing::error!(operation, attempts, "Giving up after repeated rate limiting");
                    return Err(SpotifyApiError::RateLimited { retry_after });
                }

                let wait = policy.backoff(retry_after);
                tracing::warn!(
                    operation,
                    attempt = attempts,
                    wait_secs = wait.as_secs_f64(),
                    "Spotify rate limit hit, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_server_delay_plus_one_second() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let succeeded_at = Arc::new(std::sync::Mutex::new(None));

        let result = with_rate_limit_retry(&RateLimitPolicy::default(), "test", || {
            let calls = calls.clone();
            let succeeded_at = succeeded_at.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SpotifyApiError::RateLimited {
                        retry_after: Some(Duration::from_secs(2)),
                    })
                } else {
                    *succeeded_at.lock().unwrap() = Some(Instant::now());
                    Ok("playlists")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("playlists"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let succeeded_at = succeeded_at.lock().unwrap().unwrap();
        assert!(succeeded_at.duration_since(started) >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_retry_after_uses_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = with_rate_limit_retry(&RateLimitPolicy::default(), "test", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SpotifyApiError::RateLimited { retry_after: None })
                } else {
                    Ok(1)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: ApiResult<()> =
            with_rate_limit_retry(&RateLimitPolicy::default(), "test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SpotifyApiError::Transient("connection reset".into()))
                }
            })
            .await;

        assert_eq!(
            result,
            Err(SpotifyApiError::Transient("connection reset".into()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_by_default() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_rate_limit_retry(&RateLimitPolicy::default(), "test", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 50 {
                    Err(SpotifyApiError::RateLimited {
                        retry_after: Some(Duration::from_secs(30)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_returns_rate_limited() {
        let policy = RateLimitPolicy {
            max_retries: Some(2),
            ..RateLimitPolicy::default()
        };
        let calls = Arc::new(AtomicU32::new(0));

        let result: ApiResult<()> = with_rate_limit_retry(&policy, "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SpotifyApiError::RateLimited {
                    retry_after: Some(Duration::from_secs(1)),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(SpotifyApiError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
