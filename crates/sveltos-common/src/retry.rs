//! Bounded exponential backoff with jitter.
//!
//! Used by the persistent-token poll, the only remote read in a bootstrap
//! that is allowed to retry. Every wait races against a cancellation token
//! and an optional deadline so a cancelled caller is never left sleeping.
//!
//! # Example
//!
//! ```ignore
//! use sveltos_common::retry::{BackoffPolicy, Cancellation};
//!
//! let policy = BackoffPolicy::default();
//! let cancel = Cancellation::new(token, Some(deadline));
//! for attempt in 0..policy.max_attempts {
//!     // ... one read ...
//!     cancel.sleep(policy.next_delay(attempt), "wait for token").await?;
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Backoff schedule for a bounded retry loop.
///
/// Attempt `k` (0-indexed) computes `backoff = min(base * 2^k, max_delay)`
/// and waits `backoff + backoff / 2 + U[0, 1) * base`.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base interval; also scales the random jitter
    pub base: Duration,
    /// Cap on the exponential component
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl BackoffPolicy {
    /// Exponential component for an attempt, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(63) as i32);
        let secs = (self.base.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Full wait for an attempt given a jitter sample in `[0, 1)`
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let backoff = self.backoff(attempt).as_secs_f64();
        let jitter = jitter.clamp(0.0, 1.0) * self.base.as_secs_f64() + backoff * 0.5;
        Duration::from_secs_f64(backoff + jitter)
    }

    /// Full wait for an attempt with a fresh random jitter sample
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.delay_with_jitter(attempt, jitter)
    }
}

/// External stop signal for a retry loop: a cancellation token plus an
/// optional absolute deadline.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Create from a token and an optional deadline
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// A signal that never fires
    pub fn none() -> Self {
        Self::default()
    }

    /// Return a copy that also stops at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether the token was cancelled or the deadline has passed
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled or the deadline elapses
    pub async fn stopped(&self) {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = deadline => {}
        }
    }

    /// Sleep for `delay` unless stopped first
    pub async fn sleep(&self, delay: Duration, operation: &str) -> Result<(), Error> {
        self.run(tokio::time::sleep(delay), operation).await
    }

    /// Drive `fut` to completion unless stopped first
    pub async fn run<F, T>(&self, fut: F, operation: &str) -> Result<T, Error>
    where
        F: Future<Output = T>,
    {
        if self.is_stopped() {
            return Err(Error::cancelled(operation));
        }
        tokio::select! {
            biased;
            _ = self.stopped() => Err(Error::cancelled(operation)),
            out = fut => Ok(out),
        }
    }
}
