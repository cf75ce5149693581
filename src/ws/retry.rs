//! Reconnection policy.
//!
//! A policy maps the number of consecutive failed attempts to a
//! [`RetryDecision`]. Exponential backoff, a max-attempts cutoff or unlimited
//! retries are all expressed here; the connection manager only follows the
//! decision.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;

use super::config::ReconnectConfig;

/// What to do after a connection attempt failed or a live connection dropped.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryDecision {
    /// Give up entirely; no further connection attempt is made
    pub abandon: bool,
    /// Wait this long before the next attempt
    pub delay: Option<Duration>,
    /// Reset the attempt counter to zero for the next cycle
    pub reset: bool,
}

impl RetryDecision {
    #[must_use]
    pub const fn abandon() -> Self {
        Self {
            abandon: true,
            delay: None,
            reset: false,
        }
    }

    #[must_use]
    pub const fn retry_now() -> Self {
        Self {
            abandon: false,
            delay: None,
            reset: false,
        }
    }

    #[must_use]
    pub const fn retry_after(delay: Duration) -> Self {
        Self {
            abandon: false,
            delay: Some(delay),
            reset: false,
        }
    }

    #[must_use]
    pub const fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

/// Decides whether and when to reconnect, given the attempt count.
///
/// `attempt` is `0` for the first reconnection after a successful connection.
pub trait RetryPolicy: Send + Sync + 'static {
    fn decide(&self, attempt: u32) -> RetryDecision;
}

impl<F> RetryPolicy for F
where
    F: Fn(u32) -> RetryDecision + Send + Sync + 'static,
{
    fn decide(&self, attempt: u32) -> RetryDecision {
        self(attempt)
    }
}

impl RetryPolicy for ReconnectConfig {
    fn decide(&self, attempt: u32) -> RetryDecision {
        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return RetryDecision::abandon();
        }

        if attempt == 0 {
            return RetryDecision::retry_now();
        }

        let mut backoff: ExponentialBackoff = self.clone().into();
        let mut delay = None;
        for _ in 0..attempt {
            delay = backoff.next_backoff();
        }

        RetryDecision {
            abandon: false,
            delay,
            reset: false,
        }
    }
}
