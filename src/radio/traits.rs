//! Radio collaborator interface

use bytes::Bytes;
use std::io;
use thiserror::Error;

/// CRC outcome reported by the radio for a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Ok,
    Bad,
    /// Packet sent without a CRC
    Missing,
}

/// One packet taken off the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioPacket {
    pub payload: Bytes,
    pub crc: CrcStatus,
}

impl RadioPacket {
    pub fn new(payload: impl Into<Bytes>, crc: CrcStatus) -> Self {
        Self {
            payload: payload.into(),
            crc,
        }
    }
}

/// Errors handing a packet to the radio
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Radio busy")]
    Busy,

    #[error("No node to transmit to")]
    NoPeer,

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("Radio I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A half-duplex packet radio
///
/// Both operations return immediately. `transmit` queues the packet; airtime
/// happens after it returns.
pub trait Radio {
    /// Take one received packet if one is waiting
    fn try_receive(&mut self) -> Option<RadioPacket>;

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError>;
}
