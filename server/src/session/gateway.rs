//! What the collector knows about one gateway

use onechan_shared::status::StatusReport;
use onechan_shared::GatewayIdentity;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Gateway seen through its PUSH_DATA and PULL_DATA traffic
#[derive(Debug, Clone)]
pub struct GatewayInfo {
    pub identity: GatewayIdentity,
    /// Where downlinks go: the source of the latest PULL_DATA
    pub pull_addr: Option<SocketAddr>,
    pub push_addr: Option<SocketAddr>,
    pub last_seen: Instant,
    pub pushes: u64,
    pub pulls: u64,
    pub last_status: Option<StatusReport>,
}

impl GatewayInfo {
    pub fn new(identity: GatewayIdentity, now: Instant) -> Self {
        Self {
            identity,
            pull_addr: None,
            push_addr: None,
            last_seen: now,
            pushes: 0,
            pulls: 0,
            last_status: None,
        }
    }

    /// Silent for longer than `timeout` as of `now`
    pub fn is_silent(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}
