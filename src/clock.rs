//! Time sources for the bridge loop

use chrono::{DateTime, Utc};
use std::time::Instant;

/// One reading of both clocks, taken at the top of a loop iteration
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Wrapping millisecond counter since start
    pub millis: u32,
    /// Wall-clock time for status reports
    pub wall: DateTime<Utc>,
}

/// Monotonic millisecond counter that wraps like a device uptime counter
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn millis(&self) -> u32 {
        // Truncation is the wrap
        self.start.elapsed().as_millis() as u32
    }

    pub fn tick(&self) -> Tick {
        Tick {
            millis: self.millis(),
            wall: Utc::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a wall-clock time the way status reports carry it
pub fn format_status_time(wall: &DateTime<Utc>) -> String {
    wall.format("%Y-%m-%d %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_time_format() {
        let wall = Utc.with_ymd_and_hms(2016, 3, 25, 8, 5, 9).unwrap();
        assert_eq!(format_status_time(&wall), "2016-03-25 08:05:09 GMT");
    }

    #[test]
    fn test_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.millis().wrapping_sub(a) >= 5);
    }
}
