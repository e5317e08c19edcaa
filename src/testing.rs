//! In-memory collaborators for unit tests

use crate::radio::{Radio, RadioError, RadioPacket};
use crate::transport::traits::SendError;
use crate::transport::{DatagramTransport, LinkControl};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;

/// Transport that records sends and replays queued inbound datagrams
#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
    pub inbound: VecDeque<(Vec<u8>, SocketAddr)>,
    pub failing: HashSet<SocketAddr>,
    /// Every send fails with `TransportDown`
    pub down: bool,
    pub rebind_fails: bool,
    pub rebinds: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, frame: impl Into<Vec<u8>>, from: SocketAddr) {
        self.inbound.push_back((frame.into(), from));
    }

    pub fn fail_target(&mut self, addr: SocketAddr) {
        self.failing.insert(addr);
    }

    pub fn sent_to(&self, addr: SocketAddr) -> usize {
        self.sent.iter().filter(|(_, to)| *to == addr).count()
    }
}

impl DatagramTransport for MockTransport {
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((frame, from)) = self.inbound.pop_front() else {
            return Ok(None);
        };
        // Truncate like a real datagram socket
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(Some((n, from)))
    }

    fn send_to(&mut self, frame: &[u8], target: SocketAddr) -> Result<(), SendError> {
        if self.down {
            return Err(SendError::TransportDown);
        }
        if self.failing.contains(&target) {
            return Err(SendError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }
        self.sent.push((frame.to_vec(), target));
        Ok(())
    }

    fn rebind(&mut self) -> io::Result<()> {
        self.rebinds += 1;
        if self.rebind_fails {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "in use"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Radio fed from a queue that records every transmit
#[derive(Debug, Default)]
pub struct MockRadio {
    pub rx: VecDeque<RadioPacket>,
    pub transmitted: Vec<Vec<u8>>,
    pub busy: bool,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: RadioPacket) {
        self.rx.push_back(packet);
    }
}

impl Radio for MockRadio {
    fn try_receive(&mut self) -> Option<RadioPacket> {
        self.rx.pop_front()
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if self.busy {
            return Err(RadioError::Busy);
        }
        self.transmitted.push(payload.to_vec());
        Ok(())
    }
}

/// Link whose state is set by the test
#[derive(Debug)]
pub struct MockLink {
    pub up: bool,
    pub restores: usize,
    pub fallback: bool,
    pub fallback_starts: usize,
}

impl Default for MockLink {
    fn default() -> Self {
        Self {
            up: true,
            restores: 0,
            fallback: false,
            fallback_starts: 0,
        }
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkControl for MockLink {
    fn is_up(&mut self) -> bool {
        self.up
    }

    fn try_restore(&mut self) {
        self.restores += 1;
    }

    fn start_fallback_ap(&mut self) {
        if !self.fallback {
            self.fallback_starts += 1;
        }
        self.fallback = true;
    }

    fn stop_fallback_ap(&mut self) {
        self.fallback = false;
    }

    fn fallback_active(&self) -> bool {
        self.fallback
    }
}
