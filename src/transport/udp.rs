//! UDP transport implementation over a non-blocking socket

use crate::transport::traits::{DatagramTransport, SendError};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::debug;

/// Non-blocking UDP socket implementing DatagramTransport
pub struct UdpTransport {
    bind_addr: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    /// Bind the gateway's local UDP port
    pub fn bind(bind_addr: SocketAddr) -> io::Result<Self> {
        let socket = open(bind_addr)?;
        Ok(Self {
            bind_addr,
            socket: Some(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        }
    }
}

fn open(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

impl DatagramTransport for UdpTransport {
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some(socket) = &self.socket else {
            return Ok(None);
        };
        match socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, frame: &[u8], target: SocketAddr) -> Result<(), SendError> {
        let socket = self.socket.as_ref().ok_or(SendError::TransportDown)?;
        let written = socket.send_to(frame, target)?;
        if written != frame.len() {
            return Err(SendError::Short {
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    fn rebind(&mut self) -> io::Result<()> {
        // Release the port before binding it again
        self.socket = None;
        let socket = open(self.bind_addr)?;
        debug!("[LINK] UDP transport rebound on {}", socket.local_addr()?);
        self.socket = Some(socket);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "UDP"
    }
}
