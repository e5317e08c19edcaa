//! Keepalive and status timers

use onechan_shared::timing;

/// Which periodic frames are due on this tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Due {
    pub status: bool,
    pub keepalive: bool,
}

impl Due {
    pub fn any(&self) -> bool {
        self.status || self.keepalive
    }
}

/// Two independent wrapping millisecond timers
///
/// A timer is reset the moment it is reported due, whether or not the frame
/// then reaches a backend. A failed send waits for the next interval.
#[derive(Debug, Clone)]
pub struct KeepaliveScheduler {
    last_keepalive_ms: u32,
    last_status_ms: u32,
    keepalive_interval_ms: u32,
    status_interval_ms: u32,
}

impl KeepaliveScheduler {
    /// Both timers start counting at `now_ms`
    pub fn new(keepalive_interval_ms: u32, status_interval_ms: u32, now_ms: u32) -> Self {
        Self {
            last_keepalive_ms: now_ms,
            last_status_ms: now_ms,
            keepalive_interval_ms,
            status_interval_ms,
        }
    }

    pub fn tick(&mut self, now_ms: u32) -> Due {
        let mut due = Due::default();

        if timing::is_due(now_ms, self.last_status_ms, self.status_interval_ms) {
            self.last_status_ms = now_ms;
            due.status = true;
        }
        if timing::is_due(now_ms, self.last_keepalive_ms, self.keepalive_interval_ms) {
            self.last_keepalive_ms = now_ms;
            due.keepalive = true;
        }

        due
    }

    #[cfg(test)]
    pub fn last_keepalive_ms(&self) -> u32 {
        self.last_keepalive_ms
    }
}

impl Default for KeepaliveScheduler {
    fn default() -> Self {
        Self::new(timing::KEEPALIVE_INTERVAL_MS, timing::STATUS_INTERVAL_MS, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_intervals() {
        let mut sched = KeepaliveScheduler::default();

        assert!(!sched.tick(30_999).any());
        assert_eq!(sched.tick(31_000), Due { status: false, keepalive: true });
        assert!(!sched.tick(60_999).any());
        assert_eq!(sched.tick(61_000), Due { status: true, keepalive: false });
        assert_eq!(sched.tick(62_000), Due { status: false, keepalive: true });
    }

    #[test]
    fn test_due_across_wraparound() {
        let mut sched = KeepaliveScheduler::new(0x30, 0x1000, 0xFFFF_FFF0);

        assert!(!sched.tick(0xFFFF_FFFF).keepalive);
        assert!(!sched.tick(0x0000_0010).keepalive);
        assert!(sched.tick(0x0000_0020).keepalive);
        assert_eq!(sched.last_keepalive_ms(), 0x20);
        assert!(!sched.tick(0x0000_0040).keepalive);
    }

    #[test]
    fn test_timer_resets_once_per_fire() {
        let mut sched = KeepaliveScheduler::new(1_000, 5_000, 0);

        // Even after a long stall the timer fires once and rearms from now
        assert!(sched.tick(10_000).keepalive);
        assert!(!sched.tick(10_500).keepalive);
        assert!(sched.tick(11_000).keepalive);
    }
}
