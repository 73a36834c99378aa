//! Bounded, cancellable polling.
//!
//! Every long wait in tidegrid is a loop of "check, then sleep" with a
//! strategy-defined delay and a hard attempt limit. The owning operation's
//! [`CancellationToken`] is raced against every sleep.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How long to wait between checks, and how many checks to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStrategy {
    /// Same interval every time.
    Fixed { interval: Duration, max_attempts: u32 },
    /// Starts at `base_delay`, doubles after each check, capped at `max_delay`.
    Backoff {
        base_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
    /// For operations with a known typical runtime: the first wait is the
    /// whole expected runtime, later waits halve down to `min_delay`.
    SlowStart {
        expected_runtime: Duration,
        min_delay: Duration,
        max_attempts: u32,
    },
}

impl PollingStrategy {
    pub fn max_attempts(&self) -> u32 {
        match self {
            PollingStrategy::Fixed { max_attempts, .. }
            | PollingStrategy::Backoff { max_attempts, .. }
            | PollingStrategy::SlowStart { max_attempts, .. } => *max_attempts,
        }
    }

    /// Delay after the `attempt`-th (zero-based) unsuccessful check.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        match *self {
            PollingStrategy::Fixed { interval, .. } => interval,
            PollingStrategy::Backoff {
                base_delay,
                max_delay,
                ..
            } => base_delay.saturating_mul(factor).min(max_delay),
            PollingStrategy::SlowStart {
                expected_runtime,
                min_delay,
                ..
            } => (expected_runtime / factor).max(min_delay),
        }
    }
}

/// Why a poll ended without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    Cancelled,
    Exhausted { attempts: u32 },
    /// The check itself failed; polling stops immediately.
    Check(E),
}

/// Run `check` until it yields `Some`, the attempts run out, or `cancel` fires.
///
/// The check receives the zero-based attempt number.
pub async fn poll<T, E, F, Fut>(
    strategy: &PollingStrategy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let max_attempts = strategy.max_attempts();
    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if let Some(value) = check(attempt).await.map_err(PollError::Check)? {
            return Ok(value);
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let delay = strategy.delay(attempt);
        trace!(attempt, ?delay, "condition not met, waiting");
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Err(PollError::Exhausted {
        attempts: max_attempts,
    })
}
