//! Inbound frame dispatch
//!
//! One datagram per `poll`, so a burst of inbound traffic is spread over
//! several loop iterations.

use crate::downlink::policy::{DownlinkPolicy, ImmediateTransmit};
use crate::radio::Radio;
use crate::stats::StatsCounters;
use crate::transport::DatagramTransport;
use crate::uplink::TokenTracker;
use onechan_shared::codec::{self, DecodeError, ProtocolFrame};
use onechan_shared::{FrameEncoder, FrameKind, RX_BUFF_SIZE, SHORT_HEADER_LEN};
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was queued
    Idle,
    /// A frame was decoded and dispatched
    Handled(FrameKind),
    /// A datagram arrived but was discarded
    Rejected,
    /// The transport reported an error
    TransportError,
}

impl PollOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, PollOutcome::Idle)
    }
}

pub struct DownlinkReceiver<P = ImmediateTransmit> {
    policy: P,
    buf: Vec<u8>,
    ack_encoder: FrameEncoder,
}

impl DownlinkReceiver<ImmediateTransmit> {
    pub fn new() -> Self {
        Self::with_policy(ImmediateTransmit)
    }
}

impl Default for DownlinkReceiver<ImmediateTransmit> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DownlinkPolicy> DownlinkReceiver<P> {
    pub fn with_policy(policy: P) -> Self {
        Self {
            policy,
            // One byte over capacity so an oversize datagram is seen, not clipped
            buf: vec![0u8; RX_BUFF_SIZE + 1],
            ack_encoder: FrameEncoder::new(SHORT_HEADER_LEN),
        }
    }

    /// Check the transport once and dispatch at most one datagram
    pub fn poll<T, R>(
        &mut self,
        transport: &mut T,
        radio: &mut R,
        stats: &mut StatsCounters,
        tokens: Option<&mut TokenTracker>,
        now_ms: u32,
    ) -> PollOutcome
    where
        T: DatagramTransport + ?Sized,
        R: Radio + ?Sized,
    {
        let (len, from) = match transport.try_recv_from(&mut self.buf) {
            Ok(Some(received)) => received,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                warn!("[DOWNLINK] Receive failed on {}: {}", transport.name(), e);
                return PollOutcome::TransportError;
            }
        };

        let frame = match codec::decode(&self.buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                stats.record_invalid();
                match e {
                    DecodeError::UnknownKind { version, token, kind } => warn!(
                        "[DOWNLINK] Unknown frame kind 0x{:02x} from {} (version={}, token={:04x})",
                        kind, from, version, token
                    ),
                    other => warn!("[DOWNLINK] Discarding datagram from {}: {}", from, other),
                }
                return PollOutcome::Rejected;
            }
        };
        trace!(
            "[DOWNLINK] {} token={:04x} len={} from {}",
            frame.kind,
            frame.token,
            len,
            from
        );

        match frame.kind {
            FrameKind::PushAck | FrameKind::PullAck => {
                if frame.kind == FrameKind::PushAck {
                    stats.record_push_acked();
                }
                debug!("[DOWNLINK] {} token={:04x} from {}", frame.kind, frame.token, from);
                if let Some(tracker) = tokens {
                    tracker.match_ack(frame.token, frame.kind, now_ms);
                }
                PollOutcome::Handled(frame.kind)
            }
            FrameKind::PullResp => self.handle_pull_resp(transport, radio, stats, &frame, from),
            FrameKind::PullData => {
                debug!("[DOWNLINK] Ignoring inbound PULL_DATA from {}", from);
                PollOutcome::Rejected
            }
            FrameKind::PushData => {
                stats.record_invalid();
                warn!("[DOWNLINK] Unexpected PUSH_DATA from {}", from);
                PollOutcome::Rejected
            }
        }
    }

    /// Radio first, acknowledgement second, and only to the sender
    fn handle_pull_resp<T, R>(
        &mut self,
        transport: &mut T,
        radio: &mut R,
        stats: &mut StatsCounters,
        frame: &ProtocolFrame,
        from: SocketAddr,
    ) -> PollOutcome
    where
        T: DatagramTransport + ?Sized,
        R: Radio + ?Sized,
    {
        stats.record_downlink_received();

        if frame.payload.is_empty() {
            stats.record_invalid();
            warn!("[DOWNLINK] Empty PULL_RESP from {}", from);
            return PollOutcome::Rejected;
        }

        if let Err(e) = self.policy.schedule(&frame.payload, radio) {
            stats.record_invalid();
            warn!(
                "[DOWNLINK] Radio refused {} byte downlink from {}: {}",
                frame.payload.len(),
                from,
                e
            );
            return PollOutcome::Rejected;
        }
        stats.record_downlink_transmitted();
        info!("[DOWNLINK] Transmitted {} byte downlink", frame.payload.len());

        match self.ack_encoder.encode(FrameKind::PullAck, frame.token, None, None) {
            Ok(ack) => {
                if let Err(e) = transport.send_to(&ack, from) {
                    warn!("[DOWNLINK] PULL_ACK to {} failed: {}", from, e);
                }
            }
            Err(e) => warn!("[DOWNLINK] Failed to encode PULL_ACK: {}", e),
        }

        PollOutcome::Handled(FrameKind::PullResp)
    }
}
