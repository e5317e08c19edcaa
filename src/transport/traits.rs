//! Transport trait abstraction for the datagram link and the link layer

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors sending one datagram to one target
#[derive(Error, Debug)]
pub enum SendError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Short write: {written} of {expected} bytes")]
    Short { written: usize, expected: usize },

    #[error("Transport is down")]
    TransportDown,
}

/// A non-blocking datagram transport
///
/// Every method returns promptly; nothing here may wait for the network.
pub trait DatagramTransport {
    /// Receive one datagram if one is queued, `Ok(None)` otherwise
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Send one datagram to `target`
    fn send_to(&mut self, frame: &[u8], target: SocketAddr) -> Result<(), SendError>;

    /// Drop and re-create the underlying socket
    fn rebind(&mut self) -> io::Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// The link layer beneath the datagram transport (network association)
///
/// Bringing the link up is somebody else's job; the bridge only asks
/// whether it is up, kicks a restore and requests the fallback access point.
pub trait LinkControl {
    fn is_up(&mut self) -> bool;

    /// Start (or continue) restoring the link without waiting for it
    fn try_restore(&mut self);

    fn start_fallback_ap(&mut self);

    fn stop_fallback_ap(&mut self);

    fn fallback_active(&self) -> bool;
}
