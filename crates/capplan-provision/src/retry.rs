//! Jittered exponential backoff for remote calls.
//!
//! Only [`RemoteError::Transient`] failures are retried. A call stops after
//! `max_attempts` tries, or earlier when the next sleep would push the call
//! past `max_elapsed`.

use std::future::Future;
use std::time::Duration;

use capplan_core::RetrySettings;
use rand::Rng;
use tracing::{debug, warn};

use crate::clock::{CancelSignal, Clock};
use crate::error::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default(), 5)
    }
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_elapsed: Duration::from_secs(settings.max_elapsed_secs),
        }
    }

    /// Upper bound of the sleep before retry number `retry` (1-based):
    /// `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Equal jitter: half the ceiling fixed, the other half random.
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry).as_millis() as u64;
        let half = ceiling / 2;
        let jitter = rand::rng().random_range(0..=ceiling - half);
        Duration::from_millis(half + jitter)
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// A permanent error, or the last transient one once the budget ran out.
    Remote(RemoteError),
    /// Cancellation was observed before the next attempt. Carries the
    /// transient error that scheduled the interrupted backoff, if any.
    Cancelled { last_error: Option<RemoteError> },
}

/// Run `op` under `policy`. Returns the final result and how many attempts
/// were made.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancelSignal,
    what: &str,
    mut op: F,
) -> (Result<T, RetryError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let started = clock.now();
    let mut attempts = 0u32;
    let mut last_error: Option<RemoteError> = None;

    loop {
        if cancel.is_cancelled() {
            debug!(%what, attempts, "cancelled before attempt");
            return (Err(RetryError::Cancelled { last_error }), attempts);
        }

        attempts += 1;
        let error = match op().await {
            Ok(value) => return (Ok(value), attempts),
            Err(e) => e,
        };

        if !error.is_transient() {
            debug!(%what, attempts, %error, "permanent failure, not retrying");
            return (Err(RetryError::Remote(error)), attempts);
        }
        if attempts >= policy.max_attempts {
            warn!(%what, attempts, %error, "retry attempts exhausted");
            return (Err(RetryError::Remote(error)), attempts);
        }

        let delay = policy.delay(attempts);
        let elapsed = clock.now().saturating_sub(started);
        if elapsed + delay > policy.max_elapsed {
            warn!(%what, attempts, elapsed_ms = elapsed.as_millis() as u64, %error, "retry time budget exhausted");
            return (Err(RetryError::Remote(error)), attempts);
        }

        warn!(%what, attempts, delay_ms = delay.as_millis() as u64, %error, "transient failure, retrying");
        tokio::select! {
            _ = clock.sleep(delay) => {}
            _ = cancel.cancelled() => {
                debug!(%what, attempts, "cancelled during backoff");
                return (Err(RetryError::Cancelled { last_error: Some(error) }), attempts);
            }
        }
        last_error = Some(error);
    }
}
