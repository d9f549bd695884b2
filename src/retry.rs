use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::context::CallContext;
use crate::error::Result;

/// Bounded exponential backoff for transient failures / 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries / 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based): 100ms, 200ms, 400ms, ...
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = base.min(self.max_backoff);
        let jitter_ms = capped.as_millis() as u64 / 4;
        if jitter_ms == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        capped.saturating_sub(Duration::from_millis(jitter))
    }
}

/// Run `operation` under `ctx`, retrying throttled and connection failures.
/// Permanent failures and cancellation return immediately.
pub async fn retry<F, Fut, T>(
    ctx: &CallContext,
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match ctx.run(operation()).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.backoff(attempt - 1);
                warn!(
                    "Retryable error in {} (attempt {}/{}): {}, retrying in {:?}",
                    operation_name, attempt, policy.max_attempts, e, delay
                );
                ctx.run(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
        }
    }
}
