//! Binary frame codec for the gateway protocol
//!
//! Every datagram starts with a short header:
//! ```text
//! [ version:u8 ][ token_lo:u8 ][ token_hi:u8 ][ kind:u8 ]
//! ```
//! PUSH_DATA and PULL_DATA extend it with the 8-byte gateway identity
//! (12-byte header). PUSH_DATA and PULL_RESP are followed by a payload.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    FrameKind, GatewayIdentity, FULL_HEADER_LEN, PROTOCOL_VERSION, RX_BUFF_SIZE, SHORT_HEADER_LEN,
    TX_BUFF_SIZE,
};

/// Errors that can occur while decoding an inbound datagram
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed frame: {len} bytes (need at least {needed})")]
    Malformed { len: usize, needed: usize },

    #[error("Frame too large: {len} bytes (max: {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Unknown frame kind 0x{kind:02x} (version={version} token=0x{token:04x})")]
    UnknownKind { version: u8, token: u16, kind: u8 },
}

/// Errors that can occur while encoding an outbound frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Frame too large: {len} bytes (max: {max})")]
    TooLarge { len: usize, max: usize },

    #[error("{0} requires a gateway identity")]
    MissingIdentity(FrameKind),
}

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub version: u8,
    pub token: u16,
    pub kind: FrameKind,
    /// Present for PUSH_DATA and PULL_DATA
    pub identity: Option<GatewayIdentity>,
    pub payload: Bytes,
}

/// Header length for a given kind
pub const fn header_len(kind: FrameKind) -> usize {
    if kind.carries_identity() {
        FULL_HEADER_LEN
    } else {
        SHORT_HEADER_LEN
    }
}

/// Total encoded length of a frame
pub fn encoded_len(kind: FrameKind, payload: Option<&[u8]>) -> usize {
    let body = if kind.carries_payload() {
        payload.map_or(0, <[u8]>::len)
    } else {
        0
    };
    header_len(kind) + body
}

/// Encode a frame into a fresh buffer
pub fn encode(
    kind: FrameKind,
    token: u16,
    identity: Option<&GatewayIdentity>,
    payload: Option<&[u8]>,
) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::with_capacity(encoded_len(kind, payload));
    encode_into(&mut buf, TX_BUFF_SIZE, kind, token, identity, payload)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer, bounded by `max_len`
pub fn encode_into(
    buf: &mut BytesMut,
    max_len: usize,
    kind: FrameKind,
    token: u16,
    identity: Option<&GatewayIdentity>,
    payload: Option<&[u8]>,
) -> Result<(), EncodeError> {
    let len = encoded_len(kind, payload);
    if len > max_len {
        return Err(EncodeError::TooLarge { len, max: max_len });
    }

    buf.reserve(len);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u16_le(token);
    buf.put_u8(kind.code());

    if kind.carries_identity() {
        let id = identity.ok_or(EncodeError::MissingIdentity(kind))?;
        buf.put_slice(id.as_bytes());
    }

    if kind.carries_payload() {
        if let Some(body) = payload {
            buf.put_slice(body);
        }
    }

    Ok(())
}

/// Decode a datagram bounded by the default receive buffer capacity
pub fn decode(buf: &[u8]) -> Result<ProtocolFrame, DecodeError> {
    decode_bounded(buf, RX_BUFF_SIZE)
}

/// Decode a datagram, rejecting anything longer than `max_len`
///
/// Unknown kinds are reported with the header fields so callers can log them.
pub fn decode_bounded(buf: &[u8], max_len: usize) -> Result<ProtocolFrame, DecodeError> {
    if buf.len() > max_len {
        return Err(DecodeError::TooLarge {
            len: buf.len(),
            max: max_len,
        });
    }
    if buf.len() < SHORT_HEADER_LEN {
        return Err(DecodeError::Malformed {
            len: buf.len(),
            needed: SHORT_HEADER_LEN,
        });
    }

    let version = buf[0];
    let token = u16::from_le_bytes([buf[1], buf[2]]);
    let kind = FrameKind::from_code(buf[3]).ok_or(DecodeError::UnknownKind {
        version,
        token,
        kind: buf[3],
    })?;

    let (identity, body) = if kind.carries_identity() {
        if buf.len() < FULL_HEADER_LEN {
            return Err(DecodeError::Malformed {
                len: buf.len(),
                needed: FULL_HEADER_LEN,
            });
        }
        let mut id = [0u8; GatewayIdentity::LEN];
        id.copy_from_slice(&buf[SHORT_HEADER_LEN..FULL_HEADER_LEN]);
        (
            Some(GatewayIdentity::from_bytes(id)),
            &buf[FULL_HEADER_LEN..],
        )
    } else {
        (None, &buf[SHORT_HEADER_LEN..])
    };

    Ok(ProtocolFrame {
        version,
        token,
        kind,
        identity,
        payload: Bytes::copy_from_slice(body),
    })
}

/// Reusable encoder with a fixed capacity
#[derive(Debug)]
pub struct FrameEncoder {
    buffer: BytesMut,
    capacity: usize,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(TX_BUFF_SIZE)
    }
}

impl FrameEncoder {
    /// Create an encoder that refuses frames longer than `capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Encode one frame and hand out its bytes, leaving the buffer empty
    pub fn encode(
        &mut self,
        kind: FrameKind,
        token: u16,
        identity: Option<&GatewayIdentity>,
        payload: Option<&[u8]>,
    ) -> Result<Bytes, EncodeError> {
        self.buffer.clear();
        encode_into(&mut self.buffer, self.capacity, kind, token, identity, payload)?;
        Ok(self.buffer.split().freeze())
    }
}
