//! Polling policy and the generic poll loop.
//!
//! Asynchronous backend transitions (images becoming ready, service roles
//! reaching running) are observed by sleeping a fixed interval and asking
//! again. The default policy never gives up; a ceiling can be configured, in
//! which case exhausting it yields [`Error::Timeout`].

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::{Error, Result};

/// Default interval between polls, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default settle time after a marketplace export, in seconds.
pub const DEFAULT_EXPORT_GRACE_SECS: u64 = 10;

/// Default marketplace monitoring interval of the backend, in seconds.
pub const DEFAULT_MARKET_MONITOR_INTERVAL_SECS: u64 = 600;

/// Shortened marketplace monitoring interval used when fast-forwarding.
pub const FAST_MARKET_MONITOR_INTERVAL_SECS: u64 = 10;

/// Extra time waited on top of the shortened monitoring interval.
pub const DEFAULT_MONITOR_EPSILON_SECS: u64 = 5;

/// Fixed-interval polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between two polls
    pub interval: Duration,

    /// Maximum number of polls, `None` waits forever
    pub max_attempts: Option<u32>,
}

impl WaitPolicy {
    /// Create a policy with the default interval and no ceiling.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: None,
        }
    }

    /// Create a policy that polls back-to-back, used by tests and dry runs.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            interval: Duration::from_secs(0),
            max_attempts: None,
        }
    }

    /// Set the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Remove the attempt ceiling.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Check if the policy has a ceiling.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }

    /// Whether another poll is allowed after `attempts` polls.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    /// The awaited condition holds
    Done(T),
    /// Not there yet; the string describes the current state for logs
    Pending(String),
}

/// Polls `check` until it reports [`Progress::Done`].
///
/// Errors returned by `check` abort the loop immediately; this is how failure
/// states surface. When the policy's ceiling is reached the loop fails with
/// [`Error::Timeout`] naming `what`.
///
/// # Errors
///
/// Propagates errors from `check` and returns [`Error::Timeout`] when the
/// ceiling is exhausted.
pub async fn poll_until<T, F, Fut>(policy: &WaitPolicy, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Progress<T>>>,
{
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        match check().await? {
            Progress::Done(value) => return Ok(value),
            Progress::Pending(state) => {
                debug!(what, attempts, %state, "still waiting");
            }
        }

        if !policy.allows(attempts) {
            return Err(Error::Timeout(format!("{what} after {attempts} attempts")));
        }

        if !policy.interval.is_zero() {
            sleep(policy.interval).await;
        }
    }
}

/// Sleeps for `duration`, skipping the timer entirely for zero durations.
pub async fn settle(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_POLL_INTERVAL_SECS, 10);
        assert_eq!(DEFAULT_MARKET_MONITOR_INTERVAL_SECS, 600);
        assert_eq!(FAST_MARKET_MONITOR_INTERVAL_SECS, 10);
    }

    #[test]
    fn test_wait_policy_default_is_unbounded() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert!(!policy.is_bounded());
        assert!(policy.allows(u32::MAX - 1));
    }

    #[test]
    fn test_wait_policy_builder() {
        let policy = WaitPolicy::new()
            .with_interval(Duration::from_secs(2))
            .with_max_attempts(3);
        assert_eq!(policy.interval, Duration::from_secs(2));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
        assert!(!policy.unbounded().is_bounded());
    }

    #[tokio::test]
    async fn test_poll_until_done_after_pending() {
        let mut remaining = 3;
        let value = poll_until(&WaitPolicy::immediate(), "image 1", || {
            remaining -= 1;
            let done = remaining == 0;
            async move {
                if done {
                    Ok(Progress::Done("READY"))
                } else {
                    Ok(Progress::Pending("LOCKED".to_string()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "READY");
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let policy = WaitPolicy::immediate().with_max_attempts(4);
        let mut calls = 0;
        let result: Result<()> = poll_until(&policy, "service 3", || {
            calls += 1;
            async { Ok(Progress::Pending("DEPLOYING".to_string())) }
        })
        .await;
        assert_eq!(calls, 4);
        assert!(matches!(result, Err(Error::Timeout(msg)) if msg.contains("service 3")));
    }

    #[tokio::test]
    async fn test_poll_until_propagates_errors() {
        let result: Result<()> = poll_until(&WaitPolicy::immediate(), "image 2", || async {
            Err(Error::NotFound("image 2".to_string()))
        })
        .await;
        assert_eq!(result, Err(Error::NotFound("image 2".to_string())));
    }
}
