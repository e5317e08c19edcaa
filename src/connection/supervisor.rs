//! Connectivity supervisor with backoff and access point fallback
//!
//! Watches fan-out results and the link layer, drives the shared
//! [`LinkStateMachine`], and re-establishes the datagram transport. All work
//! happens inside `tick`, which never waits: a restore attempt is one rebind
//! and one link check, repeated on an exponential backoff. One extra attempt
//! runs when the link window closes, so the fallback access point comes up
//! on time however far the backoff has grown.

use crate::config::ReconnectConfig;
use crate::transport::{DatagramTransport, LinkControl};
use crate::uplink::SendReport;
use onechan_shared::state_machine::{
    is_valid_transition, LinkEvent, LinkState, LinkStateMachine, TransitionResult,
};
use onechan_shared::timing;
use tracing::{debug, error, info, warn};

pub struct ConnectivitySupervisor {
    fsm: LinkStateMachine,
    config: ReconnectConfig,
    retry_delay_ms: u32,
    last_attempt_ms: u32,
    last_probe_ms: u32,
    attempts: u32,
    /// The attempt at the end of the link window has run for this episode
    window_checked: bool,
}

impl ConnectivitySupervisor {
    pub fn new(config: ReconnectConfig, now_ms: u32) -> Self {
        Self {
            fsm: LinkStateMachine::new(),
            retry_delay_ms: config.retry_interval_ms,
            config,
            last_attempt_ms: now_ms,
            last_probe_ms: now_ms,
            attempts: 0,
            window_checked: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.fsm.state()
    }

    /// Bridge traffic is only sent while connected
    pub fn can_send(&self) -> bool {
        self.fsm.state() == LinkState::Connected
    }

    /// Number of failure episodes since start
    pub fn episodes(&self) -> u64 {
        self.fsm.episodes()
    }

    /// Feed the outcome of a fan-out
    ///
    /// Only a total failure counts; one reachable backend is enough.
    pub fn on_send_report(&mut self, report: &SendReport, now_ms: u32) {
        if report.all_failed() {
            self.apply(LinkEvent::AllTargetsFailed, now_ms);
        }
    }

    /// Run one supervision step
    pub fn tick<T, L>(&mut self, now_ms: u32, transport: &mut T, link: &mut L) -> LinkState
    where
        T: DatagramTransport + ?Sized,
        L: LinkControl + ?Sized,
    {
        match self.fsm.state() {
            LinkState::Connected => {
                if timing::is_due(now_ms, self.last_probe_ms, self.config.link_probe_interval_ms) {
                    self.last_probe_ms = now_ms;
                    if !link.is_up() {
                        self.apply(LinkEvent::LinkLost, now_ms);
                    }
                }
            }
            LinkState::Reconnecting | LinkState::AccessPointFallback => {
                let window_closed = self.fsm.state() == LinkState::Reconnecting
                    && !self.window_checked
                    && self.fsm.episode_exceeds(now_ms, self.config.link_window_ms());
                if window_closed {
                    self.window_checked = true;
                }
                if window_closed || timing::is_due(now_ms, self.last_attempt_ms, self.retry_delay_ms) {
                    self.attempt_restore(now_ms, transport, link);
                }
            }
        }
        self.fsm.state()
    }

    fn attempt_restore<T, L>(&mut self, now_ms: u32, transport: &mut T, link: &mut L)
    where
        T: DatagramTransport + ?Sized,
        L: LinkControl + ?Sized,
    {
        self.last_attempt_ms = now_ms;
        self.attempts = self.attempts.saturating_add(1);

        if link.is_up() {
            match transport.rebind() {
                Ok(()) => {
                    self.apply(LinkEvent::TransportRestored, now_ms);
                    if link.fallback_active() {
                        link.stop_fallback_ap();
                    }
                    return;
                }
                Err(e) => {
                    warn!(
                        "[LINK] Restoring {} failed (attempt {}): {}",
                        transport.name(),
                        self.attempts,
                        e
                    );
                }
            }
        } else {
            debug!("[LINK] Link still down (attempt {})", self.attempts);
            link.try_restore();
            if self.fsm.episode_exceeds(now_ms, self.config.link_window_ms()) {
                if let TransitionResult::Success { .. } = self.apply(LinkEvent::LinkWindowExpired, now_ms) {
                    link.start_fallback_ap();
                }
            }
        }

        // Exponential backoff
        self.retry_delay_ms = self
            .retry_delay_ms
            .saturating_mul(2)
            .min(self.config.max_retry_interval_ms);
    }

    fn apply(&mut self, event: LinkEvent, now_ms: u32) -> TransitionResult {
        let result = self.fsm.process_event(event, now_ms);
        match &result {
            TransitionResult::Success { from, to } => {
                debug_assert!(is_valid_transition(*from, *to));
                match to {
                    LinkState::Reconnecting => {
                        error!("[LINK] {:?}: {} -> {}, suspending bridge traffic", event, from, to);
                        self.retry_delay_ms = self.config.retry_interval_ms;
                        self.last_attempt_ms = now_ms;
                        self.attempts = 0;
                        self.window_checked = false;
                    }
                    LinkState::AccessPointFallback => {
                        warn!(
                            "[LINK] Link down for {}s: {} -> {}",
                            self.config.link_window_secs, from, to
                        );
                    }
                    LinkState::Connected => {
                        info!(
                            "[LINK] Transport restored after {} attempt(s): {} -> {}",
                            self.attempts, from, to
                        );
                        self.retry_delay_ms = self.config.retry_interval_ms;
                        self.last_probe_ms = now_ms;
                        self.attempts = 0;
                    }
                }
            }
            TransitionResult::Unchanged(_) => {}
            TransitionResult::Invalid { from, event } => {
                debug!("[LINK] Ignoring {:?} in {}", event, from);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLink, MockTransport};

    fn config(max_retry_interval_ms: u32) -> ReconnectConfig {
        ReconnectConfig {
            retry_interval_ms: 1_000,
            max_retry_interval_ms,
            link_window_secs: 5,
            link_probe_interval_ms: 5_000,
        }
    }

    const ALL_FAILED: SendReport = SendReport {
        attempted: 3,
        delivered: 0,
    };

    #[test]
    fn test_one_transition_per_episode() {
        let mut sup = ConnectivitySupervisor::new(config(30_000), 0);

        sup.on_send_report(&SendReport { attempted: 3, delivered: 1 }, 10);
        assert!(sup.can_send());

        sup.on_send_report(&ALL_FAILED, 20);
        sup.on_send_report(&ALL_FAILED, 30);
        sup.on_send_report(&ALL_FAILED, 40);

        assert_eq!(sup.state(), LinkState::Reconnecting);
        assert!(!sup.can_send());
        assert_eq!(sup.episodes(), 1);
    }

    #[test]
    fn test_restore_after_retry_interval() {
        let mut sup = ConnectivitySupervisor::new(config(30_000), 0);
        let mut transport = MockTransport::new();
        let mut link = MockLink::new();

        sup.on_send_report(&ALL_FAILED, 100);
        assert_eq!(sup.tick(500, &mut transport, &mut link), LinkState::Reconnecting);
        assert_eq!(transport.rebinds, 0);

        assert_eq!(sup.tick(1_100, &mut transport, &mut link), LinkState::Connected);
        assert_eq!(transport.rebinds, 1);

        // A second episode counts again
        sup.on_send_report(&ALL_FAILED, 2_000);
        assert_eq!(sup.episodes(), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let mut sup = ConnectivitySupervisor::new(config(30_000), 0);
        let mut transport = MockTransport::new();
        transport.rebind_fails = true;
        let mut link = MockLink::new();

        sup.on_send_report(&ALL_FAILED, 0);
        sup.tick(1_000, &mut transport, &mut link);
        assert_eq!(transport.rebinds, 1);

        // Next attempt waits 2 s
        sup.tick(2_500, &mut transport, &mut link);
        assert_eq!(transport.rebinds, 1);
        sup.tick(3_000, &mut transport, &mut link);
        assert_eq!(transport.rebinds, 2);

        // Transport trouble alone never brings up the fallback access point
        sup.tick(60_000, &mut transport, &mut link);
        assert_eq!(sup.state(), LinkState::Reconnecting);
        assert!(!link.fallback);
    }

    #[test]
    fn test_fallback_after_link_window() {
        let mut sup = ConnectivitySupervisor::new(config(1_000), 0);
        let mut transport = MockTransport::new();
        let mut link = MockLink::new();
        link.up = false;

        sup.on_send_report(&ALL_FAILED, 100);
        for step in 1..=4 {
            sup.tick(100 + step * 1_000, &mut transport, &mut link);
            assert_eq!(sup.state(), LinkState::Reconnecting);
        }
        assert_eq!(link.restores, 4);

        sup.tick(5_100, &mut transport, &mut link);
        assert_eq!(sup.state(), LinkState::AccessPointFallback);
        assert!(link.fallback);
        assert_eq!(transport.rebinds, 0);

        // Still retrying in the background
        link.up = true;
        sup.tick(6_100, &mut transport, &mut link);
        assert_eq!(sup.state(), LinkState::Connected);
        assert!(!link.fallback);
        assert_eq!(link.fallback_starts, 1);
    }

    #[test]
    fn test_fallback_on_time_despite_backoff() {
        let reconnect = ReconnectConfig::default();
        let window_ms = reconnect.link_window_ms();
        let mut sup = ConnectivitySupervisor::new(reconnect, 0);
        let mut transport = MockTransport::new();
        let mut link = MockLink::new();
        link.up = false;

        sup.on_send_report(&ALL_FAILED, 0);
        let mut fallback_at = None;
        for now in (100..=40_000).step_by(100) {
            if sup.tick(now, &mut transport, &mut link) == LinkState::AccessPointFallback {
                fallback_at = Some(now);
                break;
            }
        }

        assert_eq!(fallback_at, Some(window_ms));
        assert_eq!(window_ms, 20_000);
        // Backoff attempts at 1, 3, 7 and 15 s, then the window attempt
        assert_eq!(link.restores, 5);
        assert_eq!(link.fallback_starts, 1);
    }

    #[test]
    fn test_window_attempt_once_per_episode() {
        let mut sup = ConnectivitySupervisor::new(config(30_000), 0);
        let mut transport = MockTransport::new();
        transport.rebind_fails = true;
        let mut link = MockLink::new();

        sup.on_send_report(&ALL_FAILED, 0);
        for now in (100..=4_900).step_by(100) {
            sup.tick(now, &mut transport, &mut link);
        }
        // Attempts at 1 and 3 s; the next backoff attempt is due at 7 s
        assert_eq!(transport.rebinds, 2);

        sup.tick(5_000, &mut transport, &mut link);
        assert_eq!(transport.rebinds, 3);
        for now in (5_100..=6_900).step_by(100) {
            sup.tick(now, &mut transport, &mut link);
        }
        assert_eq!(transport.rebinds, 3);
        assert_eq!(sup.state(), LinkState::Reconnecting);
    }

    #[test]
    fn test_link_probe_detects_loss() {
        let mut sup = ConnectivitySupervisor::new(config(30_000), 0);
        let mut transport = MockTransport::new();
        let mut link = MockLink::new();

        link.up = false;
        assert_eq!(sup.tick(1_000, &mut transport, &mut link), LinkState::Connected);
        assert_eq!(
            sup.tick(5_000, &mut transport, &mut link),
            LinkState::Reconnecting
        );
        assert_eq!(sup.episodes(), 1);
    }
}
