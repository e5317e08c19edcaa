//! Onechan Shared Protocol Types
//!
//! This crate provides the wire types and codec for the UDP gateway protocol
//! spoken between the single channel bridge, backend collectors and the
//! development tools in this workspace.

pub mod codec;
pub mod state_machine;
pub mod status;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::{DecodeError, EncodeError, FrameEncoder, ProtocolFrame};

/// Protocol version carried in byte 0 of every frame
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Short header: version, token (2 bytes), kind
pub const SHORT_HEADER_LEN: usize = 4;

/// Full header: short header followed by the 8-byte gateway identity
pub const FULL_HEADER_LEN: usize = SHORT_HEADER_LEN + GatewayIdentity::LEN;

/// Capacity of the downlink receive buffer
pub const RX_BUFF_SIZE: usize = 1024;

/// Capacity of the uplink transmit buffer
pub const TX_BUFF_SIZE: usize = 2048;

/// Capacity of a complete status datagram (header included)
pub const STATUS_SIZE: usize = 512;

/// Timing parameters of the protocol
pub mod timing {
    /// Default PULL_DATA keepalive interval in milliseconds
    pub const KEEPALIVE_INTERVAL_MS: u32 = 31_000;

    /// Default status report interval in milliseconds
    pub const STATUS_INTERVAL_MS: u32 = 61_000;

    /// How long an outbound token is remembered for ack correlation
    pub const TOKEN_RETENTION_MS: u32 = 5_000;

    /// Downlink acknowledgement timeout used by collectors
    pub const DOWNLINK_ACK_TIMEOUT_MS: u64 = 3_000;

    /// Maximum downlink retries before a collector gives up
    pub const DOWNLINK_MAX_RETRIES: u32 = 3;

    /// A gateway silent for this many keepalive intervals is considered gone
    pub const GATEWAY_EVICT_INTERVALS: u32 = 3;

    /// Milliseconds between two readings of a wrapping millisecond counter
    pub const fn elapsed_ms(now: u32, since: u32) -> u32 {
        now.wrapping_sub(since)
    }

    /// Wraparound-safe "has `interval` passed since `last`"
    pub const fn is_due(now: u32, last: u32, interval: u32) -> bool {
        elapsed_ms(now, last) >= interval
    }
}

/// Framing of the simulated radio link between node simulators and the bridge
///
/// Each datagram is `[crc_flag][payload]`.
pub mod sim {
    pub const CRC_OK: u8 = 0;
    pub const CRC_BAD: u8 = 1;
    pub const CRC_MISSING: u8 = 2;

    /// Largest payload a single channel radio carries
    pub const MAX_RADIO_PAYLOAD: usize = 255;
}

/// Message kind carried in byte 3 of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Uplink data or status (gateway -> server)
    PushData,
    /// Server acknowledgement of a PUSH_DATA
    PushAck,
    /// Keepalive that opens the downlink path (gateway -> server)
    PullData,
    /// Downlink payload for the radio (server -> gateway)
    PullResp,
    /// Acknowledgement of PULL_DATA (server) or PULL_RESP (gateway)
    PullAck,
}

impl FrameKind {
    /// Wire code of this kind
    pub const fn code(self) -> u8 {
        match self {
            FrameKind::PushData => 0x00,
            FrameKind::PushAck => 0x01,
            FrameKind::PullData => 0x02,
            FrameKind::PullResp => 0x03,
            FrameKind::PullAck => 0x04,
        }
    }

    /// Map a wire code back to a kind, `None` for unknown codes
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(FrameKind::PushData),
            0x01 => Some(FrameKind::PushAck),
            0x02 => Some(FrameKind::PullData),
            0x03 => Some(FrameKind::PullResp),
            0x04 => Some(FrameKind::PullAck),
            _ => None,
        }
    }

    /// Kinds whose header carries the gateway identity
    pub const fn carries_identity(self) -> bool {
        matches!(self, FrameKind::PushData | FrameKind::PullData)
    }

    /// Kinds that may carry a payload after the header
    pub const fn carries_payload(self) -> bool {
        matches!(self, FrameKind::PushData | FrameKind::PullResp)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::PushData => "PUSH_DATA",
            FrameKind::PushAck => "PUSH_ACK",
            FrameKind::PullData => "PULL_DATA",
            FrameKind::PullResp => "PULL_RESP",
            FrameKind::PullAck => "PULL_ACK",
        };
        f.write_str(name)
    }
}

/// Errors parsing identities and hardware addresses
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid hardware address: {0}")]
    InvalidMac(String),

    #[error("Invalid gateway identity: {0}")]
    InvalidEui(String),
}

/// The 8-byte identifier of a gateway
///
/// Derived from the 6-byte hardware address by inserting `FF FF` between its
/// vendor half and device half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayIdentity([u8; 8]);

impl GatewayIdentity {
    pub const LEN: usize = 8;

    /// Build the identity from a hardware address
    pub const fn from_mac(mac: [u8; 6]) -> Self {
        Self([mac[0], mac[1], mac[2], 0xFF, 0xFF, mac[3], mac[4], mac[5]])
    }

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FromStr for GatewayIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();
        if hex.len() != 16 || !hex.is_ascii() {
            return Err(IdentityError::InvalidEui(s.to_string()));
        }
        let mut out = [0u8; 8];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| IdentityError::InvalidEui(s.to_string()))?;
        }
        Ok(Self(out))
    }
}

/// Parse a hardware address written as `AA:BB:CC:DD:EE:FF` (or with `-`)
pub fn parse_mac(s: &str) -> Result<[u8; 6], IdentityError> {
    let parts: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return Err(IdentityError::InvalidMac(s.to_string()));
    }
    let mut mac = [0u8; 6];
    for (slot, part) in mac.iter_mut().zip(parts) {
        if part.len() != 2 {
            return Err(IdentityError::InvalidMac(s.to_string()));
        }
        *slot = u8::from_str_radix(part, 16).map_err(|_| IdentityError::InvalidMac(s.to_string()))?;
    }
    Ok(mac)
}
