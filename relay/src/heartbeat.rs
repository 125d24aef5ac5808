//! Heartbeat / liveness tracking.
//!
//! The idle/ping/pong cycle a connection's `tokio::select!` loop drives is
//! pulled out into a standalone, clock-injectable type here so it can be
//! unit tested without sleeping.

use std::time::{Duration, Instant};

/// What the reader task should do after a heartbeat poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due yet.
    Idle,
    /// Idle threshold crossed, or a prior ping's reply window elapsed without
    /// a second miss yet — send a ping.
    SendPing,
    /// Two consecutive pings went unanswered — close the session.
    TimedOut,
}

/// Tracks the idle/ping/pong cycle for one session: a session idle past
/// `idle` gets a `{"type":"ping"}`, expects `{"type":"pong"}` within
/// `timeout`, and is timed out after two consecutive misses.
pub struct Heartbeat {
    idle: Duration,
    timeout: Duration,
    last_activity: Instant,
    awaiting_pong_since: Option<Instant>,
    missed: u32,
}

impl Heartbeat {
    pub fn new(idle: Duration, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            idle,
            timeout,
            last_activity: now,
            awaiting_pong_since: None,
            missed: 0,
        }
    }

    /// Call on every inbound frame — any frame counts as liveness.
    pub fn on_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Call specifically on an inbound `pong`.
    pub fn on_pong(&mut self, now: Instant) {
        self.on_activity(now);
        self.awaiting_pong_since = None;
        self.missed = 0;
    }

    /// Poll at a granularity finer than `timeout` (the reader task ticks
    /// this a few times a second) and act on the result.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(since) = self.awaiting_pong_since {
            if now.duration_since(since) >= self.timeout {
                self.missed += 1;
                if self.missed >= 2 {
                    return HeartbeatAction::TimedOut;
                }
                self.awaiting_pong_since = Some(now);
                return HeartbeatAction::SendPing;
            }
            return HeartbeatAction::Idle;
        }

        if now.duration_since(self.last_activity) >= self.idle {
            self.awaiting_pong_since = Some(now);
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(25);
    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn idle_before_threshold_does_nothing() {
        let mut hb = Heartbeat::new(IDLE, TIMEOUT);
        let now = Instant::now() + Duration::from_secs(10);
        assert_eq!(hb.poll(now), HeartbeatAction::Idle);
    }

    #[test]
    fn crossing_idle_threshold_sends_ping() {
        let mut hb = Heartbeat::new(IDLE, TIMEOUT);
        let now = Instant::now() + IDLE;
        assert_eq!(hb.poll(now), HeartbeatAction::SendPing);
    }

    #[test]
    fn pong_within_window_resets() {
        let mut hb = Heartbeat::new(IDLE, TIMEOUT);
        let ping_at = Instant::now() + IDLE;
        assert_eq!(hb.poll(ping_at), HeartbeatAction::SendPing);
        hb.on_pong(ping_at + Duration::from_secs(2));
        // Idle clock restarted from the pong, so no further action for a while.
        assert_eq!(hb.poll(ping_at + Duration::from_secs(3)), HeartbeatAction::Idle);
    }

    #[test]
    fn two_consecutive_misses_time_out() {
        let mut hb = Heartbeat::new(IDLE, TIMEOUT);
        let t0 = Instant::now();
        let ping_at = t0 + IDLE;
        assert_eq!(hb.poll(ping_at), HeartbeatAction::SendPing);
        let first_miss = ping_at + TIMEOUT;
        assert_eq!(hb.poll(first_miss), HeartbeatAction::SendPing);
        let second_miss = first_miss + TIMEOUT;
        assert_eq!(hb.poll(second_miss), HeartbeatAction::TimedOut);
    }

    #[test]
    fn activity_without_pong_does_not_clear_missed_count() {
        // Any frame resets the idle clock, but only a pong clears a miss in
        // flight — a non-pong frame arriving mid-wait doesn't cancel the
        // outstanding ping.
        let mut hb = Heartbeat::new(IDLE, TIMEOUT);
        let ping_at = Instant::now() + IDLE;
        assert_eq!(hb.poll(ping_at), HeartbeatAction::SendPing);
        hb.on_activity(ping_at + Duration::from_millis(500));
        let first_miss = ping_at + TIMEOUT;
        assert_eq!(hb.poll(first_miss), HeartbeatAction::SendPing);
    }
}
