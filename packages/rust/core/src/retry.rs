//! Bounded retry shared by every stage that talks to the LLM.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use quarry_shared::{QuarryError, Result};

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 2_000;

/// Run `op` up to `max_attempts` times, returning the first success.
///
/// Failed attempts are followed by a capped exponential backoff. The token is
/// checked before every attempt and interrupts the backoff; a tripped token
/// (or an attempt that itself reports cancellation) ends the loop with
/// `Cancelled`. When all attempts fail the last error is returned.
pub async fn with_retries<T, F, Fut>(
    cancel: &CancellationToken,
    max_attempts: usize,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(QuarryError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(label, attempt, max_attempts = attempts, error = %e, "attempt failed");
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(QuarryError::Cancelled),
                _ = tokio::time::sleep(backoff(attempt)) => {}
            }
        }
    }

    Err(last_error.unwrap_or_else(|| QuarryError::Llm(format!("{label}: no attempts made"))))
}

/// Delay after the `attempt`-th failure: 200ms doubling, capped at 2s.
fn backoff(attempt: usize) -> Duration {
    let exp = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
    Duration::from_millis((BASE_BACKOFF_MS << exp).min(MAX_BACKOFF_MS))
}
