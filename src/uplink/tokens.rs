//! Optional correlation of acknowledgements with outbound tokens
//!
//! Diagnostics only: nothing waits on a match and a mismatch never drops a
//! frame. Enabled with `track_tokens` in the configuration.

use onechan_shared::{timing, FrameKind};
use tracing::debug;

const SLOTS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct TokenEntry {
    token: u16,
    kind: FrameKind,
    issued_ms: u32,
}

/// Outcome of looking up an inbound acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMatch {
    Matched { request: FrameKind, rtt_ms: u32 },
    Unmatched,
}

/// Fixed-size table of recently issued tokens
#[derive(Debug)]
pub struct TokenTracker {
    slots: [Option<TokenEntry>; SLOTS],
    retention_ms: u32,
    matched: u64,
    unmatched: u64,
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new(timing::TOKEN_RETENTION_MS)
    }
}

impl TokenTracker {
    pub fn new(retention_ms: u32) -> Self {
        Self {
            slots: [None; SLOTS],
            retention_ms,
            matched: 0,
            unmatched: 0,
        }
    }

    /// Remember a token sent with a PUSH_DATA or PULL_DATA
    pub fn record(&mut self, token: u16, kind: FrameKind, now_ms: u32) {
        self.expire(now_ms);
        let entry = TokenEntry {
            token,
            kind,
            issued_ms: now_ms,
        };

        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(entry);
            return;
        }

        // Table full: overwrite the oldest entry
        if let Some(oldest) = self
            .slots
            .iter_mut()
            .max_by_key(|s| s.map_or(0, |e| timing::elapsed_ms(now_ms, e.issued_ms)))
        {
            *oldest = Some(entry);
        }
    }

    /// Look up an inbound PUSH_ACK or PULL_ACK
    ///
    /// Entries stay until they expire so every target of a fan-out can match.
    pub fn match_ack(&mut self, token: u16, ack: FrameKind, now_ms: u32) -> AckMatch {
        self.expire(now_ms);
        let request = match ack {
            FrameKind::PushAck => FrameKind::PushData,
            FrameKind::PullAck => FrameKind::PullData,
            _ => return AckMatch::Unmatched,
        };

        let found = self
            .slots
            .iter()
            .flatten()
            .find(|e| e.token == token && e.kind == request);

        match found {
            Some(entry) => {
                self.matched = self.matched.saturating_add(1);
                let rtt_ms = timing::elapsed_ms(now_ms, entry.issued_ms);
                debug!("[UPLINK] {} token={:04x} matched {} after {}ms", ack, token, request, rtt_ms);
                AckMatch::Matched { request, rtt_ms }
            }
            None => {
                self.unmatched = self.unmatched.saturating_add(1);
                debug!("[UPLINK] {} token={:04x} matches no outstanding {}", ack, token, request);
                AckMatch::Unmatched
            }
        }
    }

    pub fn matched(&self) -> u64 {
        self.matched
    }

    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }

    pub fn outstanding(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn expire(&mut self, now_ms: u32) {
        let retention = self.retention_ms;
        for slot in &mut self.slots {
            if let Some(entry) = slot {
                if timing::is_due(now_ms, entry.issued_ms, retention) {
                    *slot = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_within_retention() {
        let mut tracker = TokenTracker::new(5_000);
        tracker.record(0x1234, FrameKind::PushData, 1_000);

        assert_eq!(
            tracker.match_ack(0x1234, FrameKind::PushAck, 1_250),
            AckMatch::Matched {
                request: FrameKind::PushData,
                rtt_ms: 250
            }
        );
        // Second target acknowledging the same fan-out also matches
        assert!(matches!(
            tracker.match_ack(0x1234, FrameKind::PushAck, 1_300),
            AckMatch::Matched { .. }
        ));
        assert_eq!(tracker.matched(), 2);
    }

    #[test]
    fn test_kind_must_correspond() {
        let mut tracker = TokenTracker::new(5_000);
        tracker.record(0x0001, FrameKind::PullData, 0);
        assert_eq!(tracker.match_ack(0x0001, FrameKind::PushAck, 10), AckMatch::Unmatched);
        assert!(matches!(
            tracker.match_ack(0x0001, FrameKind::PullAck, 10),
            AckMatch::Matched { .. }
        ));
    }

    #[test]
    fn test_entries_expire() {
        let mut tracker = TokenTracker::new(5_000);
        tracker.record(0xAAAA, FrameKind::PushData, u32::MAX - 1_000);
        assert_eq!(tracker.outstanding(), 1);

        // 5 s later, across the counter wrap
        assert_eq!(
            tracker.match_ack(0xAAAA, FrameKind::PushAck, 4_000),
            AckMatch::Unmatched
        );
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.unmatched(), 1);
    }

    #[test]
    fn test_full_table_overwrites_oldest() {
        let mut tracker = TokenTracker::new(60_000);
        for i in 0..SLOTS as u16 {
            tracker.record(i, FrameKind::PushData, u32::from(i) * 10);
        }
        tracker.record(0xFFFF, FrameKind::PushData, 1_000);

        assert_eq!(tracker.outstanding(), SLOTS);
        assert_eq!(tracker.match_ack(0, FrameKind::PushAck, 1_000), AckMatch::Unmatched);
        assert!(matches!(
            tracker.match_ack(0xFFFF, FrameKind::PushAck, 1_000),
            AckMatch::Matched { .. }
        ));
    }
}
