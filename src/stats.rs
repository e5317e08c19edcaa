//! Packet statistics
//!
//! Owned by the bridge loop and lent by reference to the components that
//! count. Counters only grow (saturating) until an explicit reset.

use serde::Serialize;

/// Live counters
#[derive(Debug, Default)]
pub struct StatsCounters {
    rx_received: u64,
    rx_valid: u64,
    rx_invalid: u64,
    rx_no_crc: u64,
    forwarded: u64,
    downlink_received: u64,
    downlink_transmitted: u64,
    push_sent: u64,
    push_acked: u64,
}

/// Point-in-time copy handed to readers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub rx_received: u64,
    pub rx_valid: u64,
    pub rx_invalid: u64,
    pub rx_no_crc: u64,
    pub forwarded: u64,
    pub downlink_received: u64,
    pub downlink_transmitted: u64,
    pub push_sent: u64,
    pub push_acked: u64,
}

fn bump(counter: &mut u64) {
    *counter = counter.saturating_add(1);
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&mut self) {
        bump(&mut self.rx_received);
    }

    pub fn record_valid(&mut self) {
        bump(&mut self.rx_valid);
    }

    pub fn record_invalid(&mut self) {
        bump(&mut self.rx_invalid);
    }

    pub fn record_no_crc(&mut self) {
        bump(&mut self.rx_no_crc);
    }

    pub fn record_forwarded(&mut self) {
        bump(&mut self.forwarded);
    }

    pub fn record_downlink_received(&mut self) {
        bump(&mut self.downlink_received);
    }

    pub fn record_downlink_transmitted(&mut self) {
        bump(&mut self.downlink_transmitted);
    }

    /// One PUSH_DATA datagram accepted by the transport for one target
    pub fn record_push_sent(&mut self, datagrams: u64) {
        self.push_sent = self.push_sent.saturating_add(datagrams);
    }

    pub fn record_push_acked(&mut self) {
        bump(&mut self.push_acked);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_received: self.rx_received,
            rx_valid: self.rx_valid,
            rx_invalid: self.rx_invalid,
            rx_no_crc: self.rx_no_crc,
            forwarded: self.forwarded,
            downlink_received: self.downlink_received,
            downlink_transmitted: self.downlink_transmitted,
            push_sent: self.push_sent,
            push_acked: self.push_acked,
        }
    }

    /// Administrative reset; the only way counters ever go down
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
