//! Link layer probe for a host with an OS-managed network

use crate::transport::traits::LinkControl;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info, warn};

/// Link control backed by the host's routing table
///
/// The link counts as up when the OS can route to the probe target. Access
/// point fallback is provided by an external facility; this type records the
/// request so the rest of the bridge can report it.
pub struct HostLink {
    probe_target: SocketAddr,
    fallback: bool,
}

impl HostLink {
    pub fn new(probe_target: SocketAddr) -> Self {
        Self {
            probe_target,
            fallback: false,
        }
    }
}

impl LinkControl for HostLink {
    fn is_up(&mut self) -> bool {
        let local: SocketAddr = if self.probe_target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        // Connecting a UDP socket only consults the routing table
        match UdpSocket::bind(local).and_then(|probe| probe.connect(self.probe_target)) {
            Ok(()) => true,
            Err(e) => {
                debug!("[LINK] No route to {}: {}", self.probe_target, e);
                false
            }
        }
    }

    fn try_restore(&mut self) {
        debug!("[LINK] Waiting for the host network to return");
    }

    fn start_fallback_ap(&mut self) {
        if !self.fallback {
            warn!("[LINK] Link down too long, requesting local fallback access point");
            self.fallback = true;
        }
    }

    fn stop_fallback_ap(&mut self) {
        if self.fallback {
            info!("[LINK] Link restored, releasing fallback access point");
            self.fallback = false;
        }
    }

    fn fallback_active(&self) -> bool {
        self.fallback
    }
}
