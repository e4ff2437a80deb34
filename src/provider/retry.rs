use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::ProviderError;

const MAX_BACKOFF_MS: u64 = 30_000;

/// Per-adapter retry settings. `max_retries = 0` means a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Equal jitter backoff: base/2 + rand(0, base/2), base capped at
    /// `MAX_BACKOFF`.
    fn backoff(&self, attempt: u32) -> Duration {
        let initial = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let base = initial
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_BACKOFF_MS);
        let half = base / 2;
        Duration::from_millis(half + fastrand::u64(..half.max(1)))
    }
}

pub(crate) async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    provider: &'static str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retriable(&e) => {
                let delay = policy.backoff(attempt);
                debug!(
                    provider,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retriable(e: &ProviderError) -> bool {
    match e {
        ProviderError::RateLimited => true,
        ProviderError::Api { code, .. } => (500..=599).contains(code),
        ProviderError::Network(err) => err.is_timeout() || err.is_connect(),
        _ => false,
    }
}
