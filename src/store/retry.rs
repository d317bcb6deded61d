// 🔁 Retry Policy - typed backoff over ErrorKind
//
//   Transport / ServerError → exponential backoff
//   RateLimited             → max(Retry-After, exponential)
//   Conflict (409/412)      → exponential + jitter, separately bounded
//   NotFound / Fatal        → never retried

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ErrorKind, RemoteError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for any one call, first try included.
    pub max_attempts: u32,
    /// Attempts allowed when the failures are version conflicts.
    pub max_conflict_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 8,
            max_conflict_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting. For tests and dry runs.
    pub fn immediate() -> Self {
        RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// How long to wait before the next attempt, or `None` to give up.
    pub fn delay_for(&self, kind: &ErrorKind, attempt: u32) -> Option<Duration> {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return None;
        }
        match kind {
            ErrorKind::Conflict => {
                if attempt >= self.max_conflict_attempts {
                    return None;
                }
                Some(self.exponential(attempt) + jitter(self.base_delay))
            }
            ErrorKind::RateLimited { retry_after: Some(hint) } => Some((*hint).max(self.exponential(attempt))),
            _ => Some(self.exponential(attempt)),
        }
    }

    /// Run `op` until it succeeds, fails non-retryably, or the budget runs out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.delay_for(&err.kind, attempt) {
                    Some(delay) => {
                        warn!(
                            op = what,
                            attempt,
                            kind = %err.kind,
                            delay_ms = delay.as_millis() as u64,
                            error = %err.message,
                            "remote call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

/// Uniform jitter in `[0, max]`.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

// ============================================================================
// TESTS
// ============================================================================
