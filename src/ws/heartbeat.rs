//! Randomized heartbeat intervals and the per-connection timer.

use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, Sleep};

use crate::config::HeartbeatConfig;

/// Draws the next heartbeat interval uniformly from the configured window.
///
/// Re-drawing on every reset keeps the heartbeats of connections opened
/// together from firing together.
#[must_use]
pub fn next_interval(config: &HeartbeatConfig) -> Duration {
    let min = duration_millis(config.min_interval);
    let max = duration_millis(config.max_interval).max(min);
    Duration::from_millis(rand::rng().random_range(min..=max))
}

/// Heartbeat deadline of one connection.
///
/// Every frame sent re-arms it with a freshly drawn interval, so the
/// heartbeat only goes out on an idle connection.
#[derive(Debug)]
pub struct HeartbeatTimer {
    config: HeartbeatConfig,
    sleep: Pin<Box<Sleep>>,
}

impl HeartbeatTimer {
    /// Arms a timer with a first interval drawn from `config`.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let sleep = Box::pin(tokio::time::sleep(next_interval(&config)));
        Self { config, sleep }
    }

    /// Pushes the deadline to a new interval from now.
    pub fn rearm(&mut self) {
        let deadline = Instant::now() + next_interval(&self.config);
        self.sleep.as_mut().reset(deadline);
    }

    /// Completes once the deadline passes. Stays complete until re-armed.
    pub async fn expired(&mut self) {
        self.sleep.as_mut().await;
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(millis: u64) -> HeartbeatConfig {
        HeartbeatConfig::new("h", Duration::from_millis(millis), Duration::from_millis(millis))
    }

    /// Timer deadlines resolve to whole milliseconds.
    fn assert_near(elapsed: Duration, millis: u64) {
        let expected = Duration::from_millis(millis);
        assert!(
            elapsed >= expected && elapsed <= expected + Duration::from_millis(2),
            "elapsed {elapsed:?}, expected about {expected:?}"
        );
    }

    #[test]
    fn interval_stays_within_window() {
        let config = HeartbeatConfig::new("h", Duration::from_millis(100), Duration::from_millis(150));
        for _ in 0..200 {
            let interval = next_interval(&config);
            assert!(interval >= Duration::from_millis(100));
            assert!(interval <= Duration::from_millis(150));
        }
    }

    #[test]
    fn degenerate_window_is_fixed() {
        let config = HeartbeatConfig::new("h", Duration::from_millis(40), Duration::from_millis(40));
        assert_eq!(next_interval(&config), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_expires_after_interval() {
        let start = Instant::now();
        let mut timer = HeartbeatTimer::new(fixed(100));
        timer.expired().await;
        assert_near(start.elapsed(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_postpones_expiry() {
        let start = Instant::now();
        let mut timer = HeartbeatTimer::new(fixed(100));

        tokio::time::advance(Duration::from_millis(90)).await;
        timer.rearm();
        timer.expired().await;
        assert_near(start.elapsed(), 190);

        timer.rearm();
        timer.expired().await;
        assert_near(start.elapsed(), 290);
    }
}
