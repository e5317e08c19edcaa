//! Uplink fan-out to every configured collector

use crate::config::ServerTarget;
use crate::stats::StatsCounters;
use crate::transport::DatagramTransport;
use crate::uplink::tokens::TokenTracker;
use onechan_shared::{FrameEncoder, FrameKind, GatewayIdentity};
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, error, trace, warn};

/// A configured collector with the address it resolved to at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: ServerTarget,
    pub addr: SocketAddr,
}

impl ResolvedTarget {
    pub fn new(target: ServerTarget, addr: SocketAddr) -> Self {
        Self { target, addr }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.target, self.addr)
    }
}

/// Aggregate outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub attempted: usize,
    pub delivered: usize,
}

impl SendReport {
    pub fn any_delivered(&self) -> bool {
        self.delivered > 0
    }

    /// Every target was tried and none took the datagram
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.delivered == 0
    }
}

/// Builds uplink frames and sends each to every target independently
pub struct UplinkForwarder {
    identity: GatewayIdentity,
    targets: Vec<ResolvedTarget>,
    encoder: FrameEncoder,
}

impl UplinkForwarder {
    pub fn new(identity: GatewayIdentity, targets: Vec<ResolvedTarget>) -> Self {
        Self {
            identity,
            targets,
            encoder: FrameEncoder::default(),
        }
    }

    /// Forward a packet taken off the radio as PUSH_DATA
    ///
    /// `forwarded` counts the packet once if any target accepted it.
    pub fn forward<T: DatagramTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        stats: &mut StatsCounters,
        tokens: Option<&mut TokenTracker>,
        now_ms: u32,
        payload: &[u8],
    ) -> SendReport {
        let report = self.push(transport, stats, tokens, now_ms, payload);
        if report.any_delivered() {
            stats.record_forwarded();
        }
        debug!(
            "[UPLINK] Forwarded {} byte packet to {}/{} targets",
            payload.len(),
            report.delivered,
            report.attempted
        );
        report
    }

    /// Send a rendered status report as PUSH_DATA
    pub fn send_status<T: DatagramTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        stats: &mut StatsCounters,
        tokens: Option<&mut TokenTracker>,
        now_ms: u32,
        json: &[u8],
    ) -> SendReport {
        self.push(transport, stats, tokens, now_ms, json)
    }

    /// Send a header-only PULL_DATA keepalive
    pub fn send_keepalive<T: DatagramTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        tokens: Option<&mut TokenTracker>,
        now_ms: u32,
    ) -> SendReport {
        let token = rand::random::<u16>();
        let frame = match self
            .encoder
            .encode(FrameKind::PullData, token, Some(&self.identity), None)
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[UPLINK] Failed to encode keepalive: {}", e);
                return SendReport::default();
            }
        };
        if let Some(tracker) = tokens {
            tracker.record(token, FrameKind::PullData, now_ms);
        }
        trace!("[UPLINK] PULL_DATA token={:04x}", token);
        self.send_all(transport, &frame)
    }

    fn push<T: DatagramTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        stats: &mut StatsCounters,
        tokens: Option<&mut TokenTracker>,
        now_ms: u32,
        payload: &[u8],
    ) -> SendReport {
        let token = rand::random::<u16>();
        let frame = match self.encoder.encode(
            FrameKind::PushData,
            token,
            Some(&self.identity),
            Some(payload),
        ) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[UPLINK] Dropping PUSH_DATA: {}", e);
                return SendReport::default();
            }
        };
        if let Some(tracker) = tokens {
            tracker.record(token, FrameKind::PushData, now_ms);
        }
        trace!("[UPLINK] PUSH_DATA token={:04x} len={}", token, frame.len());

        let report = self.send_all(transport, &frame);
        stats.record_push_sent(report.delivered as u64);
        report
    }

    /// Send one encoded frame to every target
    ///
    /// A failure to one target never stops the others.
    pub fn send_all<T: DatagramTransport + ?Sized>(&self, transport: &mut T, frame: &[u8]) -> SendReport {
        let mut report = SendReport::default();
        for target in &self.targets {
            report.attempted += 1;
            match transport.send_to(frame, target.addr) {
                Ok(()) => report.delivered += 1,
                Err(e) => warn!("[UPLINK] Send to {} failed: {}", target, e),
            }
        }
        if report.all_failed() {
            error!(
                "[UPLINK] All {} targets failed over {}",
                report.attempted,
                transport.name()
            );
        }
        report
    }
}
