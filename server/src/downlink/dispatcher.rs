//! Downlink dispatcher for sending PULL_RESP frames to gateways

use crate::session::GatewayRegistry;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use onechan_shared::{codec, timing, FrameKind, GatewayIdentity};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A sent downlink awaiting its PULL_ACK
#[derive(Debug, Clone)]
pub struct PendingDownlink {
    pub token: u16,
    pub identity: GatewayIdentity,
    pub addr: SocketAddr,
    pub payload: Bytes,
    pub sent_at: Instant,
    pub retries: u32,
    pub max_retries: u32,
}

impl PendingDownlink {
    /// No PULL_ACK within the acknowledgement timeout
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.sent_at) >= ack_timeout()
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

pub fn ack_timeout() -> Duration {
    Duration::from_millis(timing::DOWNLINK_ACK_TIMEOUT_MS)
}

/// Dispatches downlinks to gateways and tracks their acknowledgements
pub struct DownlinkDispatcher {
    socket: Arc<UdpSocket>,
    registry: Arc<GatewayRegistry>,
    /// Pending downlinks by token
    pending: Arc<RwLock<HashMap<u16, PendingDownlink>>>,
}

impl DownlinkDispatcher {
    pub fn new(socket: Arc<UdpSocket>, registry: Arc<GatewayRegistry>) -> Self {
        Self {
            socket,
            registry,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Send a downlink to one gateway's pull address
    pub async fn send_downlink(&self, identity: GatewayIdentity, payload: Bytes) -> Result<u16> {
        let addr = self
            .registry
            .pull_address(&identity)
            .await
            .ok_or_else(|| anyhow!("Gateway {} has not pulled yet", identity))?;

        let mut pending = self.pending.write().await;
        // Tokens only need to be unique among outstanding downlinks
        let mut token = rand::random::<u16>();
        while pending.contains_key(&token) {
            token = rand::random::<u16>();
        }

        let entry = PendingDownlink {
            token,
            identity,
            addr,
            payload,
            sent_at: Instant::now(),
            retries: 0,
            max_retries: timing::DOWNLINK_MAX_RETRIES,
        };
        self.transmit(&entry).await?;
        info!(
            ">>> PULL_RESP token={:04x} ({} bytes) to {} at {}",
            token,
            entry.payload.len(),
            identity,
            addr
        );
        pending.insert(token, entry);

        Ok(token)
    }

    /// Send the same downlink to every gateway that can receive one
    pub async fn broadcast(&self, payload: Bytes) -> Vec<u16> {
        let mut tokens = Vec::new();
        for (identity, _) in self.registry.downlink_targets().await {
            match self.send_downlink(identity, payload.clone()).await {
                Ok(token) => tokens.push(token),
                Err(e) => warn!("Failed to send downlink to {}: {}", identity, e),
            }
        }
        tokens
    }

    /// Handle a PULL_ACK; returns the downlink it completes
    ///
    /// Only the address the downlink went to can acknowledge it.
    pub async fn handle_ack(&self, token: u16, from: SocketAddr) -> Option<PendingDownlink> {
        let mut pending = self.pending.write().await;
        if let Some(sent_to) = pending.get(&token).map(|entry| entry.addr).filter(|addr| *addr != from) {
            warn!(
                "<<< PULL_ACK token={:04x} from {}, but the downlink went to {}; ignored",
                token, from, sent_to
            );
            return None;
        }
        match pending.remove(&token) {
            Some(done) => {
                info!(
                    "<<< PULL_ACK token={:04x} from {} after {}ms",
                    token,
                    from,
                    done.sent_at.elapsed().as_millis()
                );
                Some(done)
            }
            None => {
                debug!("<<< PULL_ACK token={:04x} from {} matches no downlink", token, from);
                None
            }
        }
    }

    /// Downlinks whose acknowledgement is overdue
    pub async fn timed_out(&self, now: Instant) -> Vec<PendingDownlink> {
        let pending = self.pending.read().await;
        pending
            .values()
            .filter(|d| d.is_timed_out(now))
            .cloned()
            .collect()
    }

    /// Resend a timed out downlink with its original token
    pub async fn retry(&self, token: u16) -> Result<()> {
        let mut pending = self.pending.write().await;
        let Some(entry) = pending.get_mut(&token) else {
            return Err(anyhow!("Downlink {:04x} is no longer pending", token));
        };
        if !entry.can_retry() {
            pending.remove(&token);
            return Err(anyhow!("Downlink {:04x} exceeded max retries", token));
        }

        entry.retries += 1;
        entry.sent_at = Instant::now();
        let entry = entry.clone();
        drop(pending);

        info!(
            ">>> Retrying downlink {:04x} (attempt {}/{})",
            token,
            entry.retries + 1,
            entry.max_retries + 1
        );
        self.transmit(&entry).await
    }

    /// Give up on a downlink
    pub async fn abandon(&self, token: u16) -> Option<PendingDownlink> {
        self.pending.write().await.remove(&token)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn transmit(&self, entry: &PendingDownlink) -> Result<()> {
        let frame = codec::encode(FrameKind::PullResp, entry.token, None, Some(&entry.payload))?;
        self.socket
            .send_to(&frame, entry.addr)
            .await
            .with_context(|| format!("Failed to send PULL_RESP to {}", entry.addr))?;
        Ok(())
    }
}
