//! Bounded, fixed-delay reconnection policy.
//!
//! The policy only counts and decides; the connection loop owns the timer.
//! Each unexpected close (including a failed reconnection attempt) asks the
//! policy for at most one delay. A successful open resets the count.

use std::time::Duration;

/// Default delay before a reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Attempt counter for reconnection after unexpected closes.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use scoreboard_sync::reconnect::ReconnectPolicy;
///
/// let mut policy = ReconnectPolicy::new(Duration::from_secs(5), 2);
/// assert_eq!(policy.on_unexpected_close(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.on_unexpected_close(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.on_unexpected_close(), None);
/// assert!(policy.is_exhausted());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with the given delay and attempt cap.
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record an unexpected close.
    ///
    /// Returns the delay before the single reconnection attempt this close
    /// earns, or `None` once the cap has been reached.
    pub fn on_unexpected_close(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.delay)
    }

    /// Record a successful open.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Attempts scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Configured attempt cap.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `true` once no further attempts will be scheduled.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn eleven_closes_with_cap_ten_schedule_ten_attempts() {
        let mut policy = ReconnectPolicy::default();
        let scheduled = (0..11)
            .filter_map(|_| policy.on_unexpected_close())
            .count();
        assert_eq!(scheduled, 10);
        assert!(policy.is_exhausted());
        assert_eq!(policy.on_unexpected_close(), None);
    }

    #[test]
    fn every_attempt_uses_the_fixed_delay() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(250), 3);
        for expected in 1..=3 {
            assert_eq!(
                policy.on_unexpected_close(),
                Some(Duration::from_millis(250))
            );
            assert_eq!(policy.attempts(), expected);
        }
    }

    #[test]
    fn open_resets_the_count() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 2);
        policy.on_unexpected_close();
        policy.on_unexpected_close();
        assert!(policy.is_exhausted());

        policy.on_open();
        assert_eq!(policy.attempts(), 0);
        assert!(policy.on_unexpected_close().is_some());
    }

    #[test]
    fn zero_cap_never_reconnects() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(1), 0);
        assert!(policy.is_exhausted());
        assert_eq!(policy.on_unexpected_close(), None);
    }
}
