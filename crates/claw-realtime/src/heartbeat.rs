//! Heartbeat/keepalive mechanism.
//!
//! [`HeartbeatMonitor`] is a plain state machine owned by one open
//! connection. The connection reactor sleeps until [`HeartbeatMonitor::next_wakeup`],
//! then asks [`HeartbeatMonitor::poll`] what to do. Because the monitor lives
//! and dies with its connection, a reply or timer from an earlier connection
//! can never touch a later one.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::HeartbeatConfig;

/// What the reactor must do when the monitor wakes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing is due yet.
    Idle,
    /// Send a liveness probe.
    Probe,
    /// No reply arrived in time: force the transport closed.
    Expired,
}

/// Liveness tracking for a single open connection.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    reply_timeout: Duration,
    next_probe: Instant,
    reply_deadline: Option<Instant>,
    probes_sent: u64,
}

impl HeartbeatMonitor {
    /// Arm a monitor for a connection that opened at `opened_at`.
    ///
    /// The reply deadline starts running immediately, so a peer that never
    /// answers is detected `reply_timeout` after open.
    #[must_use]
    pub fn new(config: &HeartbeatConfig, opened_at: Instant) -> Self {
        let interval = config.interval();
        let reply_timeout = config.reply_timeout();
        Self {
            interval,
            reply_timeout,
            next_probe: opened_at + interval,
            reply_deadline: Some(opened_at + reply_timeout),
            probes_sent: 0,
        }
    }

    /// Earliest instant at which [`HeartbeatMonitor::poll`] has something to do.
    #[must_use]
    pub fn next_wakeup(&self) -> Instant {
        match self.reply_deadline {
            Some(deadline) => deadline.min(self.next_probe),
            None => self.next_probe,
        }
    }

    /// Pending reply deadline, if any.
    #[must_use]
    pub const fn reply_deadline(&self) -> Option<Instant> {
        self.reply_deadline
    }

    /// Number of probes requested so far.
    #[must_use]
    pub const fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// Advance the monitor to `now`.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if self.reply_deadline.is_some_and(|deadline| now >= deadline) {
            return HeartbeatAction::Expired;
        }
        if now < self.next_probe {
            return HeartbeatAction::Idle;
        }

        while self.next_probe <= now {
            self.next_probe += self.interval;
        }
        // A stalled peer keeps receiving probes, but only the first unanswered
        // one starts a deadline.
        if self.reply_deadline.is_none() {
            self.reply_deadline = Some(now + self.reply_timeout);
        }
        self.probes_sent += 1;
        HeartbeatAction::Probe
    }

    /// Record a liveness reply, clearing the pending deadline.
    pub fn reply_received(&mut self) {
        self.reply_deadline = None;
    }
}
