//! Fixed-interval liveness pings for an open connection.
//!
//! A [`Heartbeat`] is created when the connection reaches `Open` and dropped
//! on any transition away from it, so the timer cannot outlive the state it
//! belongs to.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::protocol::OutboundFrame;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Smallest accepted period; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Heartbeat timer. The first ping is due one full period after creation.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
}

impl Heartbeat {
    /// Start the timer.
    pub fn start(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Wait for the next tick and return the frame to send.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` next to `recv`.
    pub async fn tick(&mut self) -> OutboundFrame {
        self.interval.tick().await;
        OutboundFrame::heartbeat_now()
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

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::start(Duration::from_secs(30));
        let frame = heartbeat.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(matches!(frame, OutboundFrame::Heartbeat { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_interval() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::start(Duration::from_secs(10));
        for n in 1..=3u32 {
            heartbeat.tick().await;
            assert_eq!(start.elapsed(), Duration::from_secs(10) * n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::start(Duration::ZERO);
        heartbeat.tick().await;
        assert_eq!(start.elapsed(), MIN_PERIOD);
    }
}
