//! Simulated radio over a local UDP socket
//!
//! Node simulators send `[crc_flag][payload]` datagrams; downlinks go back to
//! the last node heard from.

use crate::radio::traits::{CrcStatus, Radio, RadioError, RadioPacket};
use bytes::Bytes;
use onechan_shared::sim;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, warn};

pub struct UdpRadio {
    socket: UdpSocket,
    last_node: Option<SocketAddr>,
    max_payload: usize,
    buf: Vec<u8>,
}

impl UdpRadio {
    pub fn bind(listen: SocketAddr, max_payload: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            last_node: None,
            max_payload,
            // One flag byte plus one spare to spot oversize packets
            buf: vec![0u8; max_payload + 2],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Radio for UdpRadio {
    fn try_receive(&mut self) -> Option<RadioPacket> {
        let (n, from) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                warn!("[RADIO] Receive error: {}", e);
                return None;
            }
        };
        self.last_node = Some(from);

        let Some((&flag, body)) = self.buf[..n].split_first() else {
            debug!("[RADIO] Empty packet from {}", from);
            return None;
        };

        let crc = match flag {
            sim::CRC_OK if body.len() <= self.max_payload => CrcStatus::Ok,
            sim::CRC_MISSING if body.len() <= self.max_payload => CrcStatus::Missing,
            // Anything oversize or with an unknown flag failed on air
            _ => CrcStatus::Bad,
        };

        Some(RadioPacket::new(Bytes::copy_from_slice(body), crc))
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > self.max_payload {
            return Err(RadioError::PayloadTooLarge(payload.len(), self.max_payload));
        }
        let node = self.last_node.ok_or(RadioError::NoPeer)?;
        match self.socket.send_to(payload, node) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(RadioError::Busy),
            Err(e) => Err(RadioError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn receive_eventually(radio: &mut UdpRadio) -> Option<RadioPacket> {
        for _ in 0..100 {
            if let Some(packet) = radio.try_receive() {
                return Some(packet);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_receive_and_reply() {
        let mut radio = UdpRadio::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let node = UdpSocket::bind("127.0.0.1:0").unwrap();
        node.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

        // No node heard yet
        assert!(matches!(radio.transmit(b"x"), Err(RadioError::NoPeer)));

        node.send_to(&[sim::CRC_OK, b'h', b'i'], radio.local_addr().unwrap())
            .unwrap();
        let packet = receive_eventually(&mut radio).expect("no packet");
        assert_eq!(packet.crc, CrcStatus::Ok);
        assert_eq!(&packet.payload[..], b"hi");

        radio.transmit(b"down").unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = node.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"down");
    }

    #[test]
    fn test_crc_flags() {
        let mut radio = UdpRadio::bind("127.0.0.1:0".parse().unwrap(), 4).unwrap();
        let node = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = radio.local_addr().unwrap();

        node.send_to(&[sim::CRC_BAD, 1], addr).unwrap();
        assert_eq!(receive_eventually(&mut radio).unwrap().crc, CrcStatus::Bad);

        node.send_to(&[sim::CRC_MISSING, 1], addr).unwrap();
        assert_eq!(receive_eventually(&mut radio).unwrap().crc, CrcStatus::Missing);

        // Oversize payload is reported as a failed reception
        node.send_to(&[sim::CRC_OK, 1, 2, 3, 4, 5], addr).unwrap();
        assert_eq!(receive_eventually(&mut radio).unwrap().crc, CrcStatus::Bad);

        assert!(matches!(
            radio.transmit(&[0u8; 5]),
            Err(RadioError::PayloadTooLarge(5, 4))
        ));
    }
}
