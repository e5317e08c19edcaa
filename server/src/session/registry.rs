//! Registry of gateways known to the collector

use super::gateway::GatewayInfo;
use onechan_shared::status::StatusReport;
use onechan_shared::{timing, GatewayIdentity};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Silence after which a gateway is forgotten
pub fn eviction_timeout() -> Duration {
    Duration::from_millis(u64::from(timing::KEEPALIVE_INTERVAL_MS) * u64::from(timing::GATEWAY_EVICT_INTERVALS))
}

/// Manages all gateways heard from, keyed by identity
pub struct GatewayRegistry {
    gateways: Arc<RwLock<HashMap<GatewayIdentity, GatewayInfo>>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a PULL_DATA; its source becomes the downlink address
    pub async fn record_pull(&self, identity: GatewayIdentity, from: SocketAddr) -> bool {
        let now = Instant::now();
        let mut gateways = self.gateways.write().await;
        let is_new = !gateways.contains_key(&identity);
        let info = gateways
            .entry(identity)
            .or_insert_with(|| GatewayInfo::new(identity, now));
        info.pull_addr = Some(from);
        info.last_seen = now;
        info.pulls += 1;
        is_new
    }

    /// Record a PUSH_DATA, keeping the status report if it carried one
    pub async fn record_push(
        &self,
        identity: GatewayIdentity,
        from: SocketAddr,
        status: Option<StatusReport>,
    ) -> bool {
        let now = Instant::now();
        let mut gateways = self.gateways.write().await;
        let is_new = !gateways.contains_key(&identity);
        let info = gateways
            .entry(identity)
            .or_insert_with(|| GatewayInfo::new(identity, now));
        info.push_addr = Some(from);
        info.last_seen = now;
        info.pushes += 1;
        if status.is_some() {
            info.last_status = status;
        }
        is_new
    }

    #[cfg(test)]
    pub async fn get(&self, identity: &GatewayIdentity) -> Option<GatewayInfo> {
        self.gateways.read().await.get(identity).cloned()
    }

    pub async fn pull_address(&self, identity: &GatewayIdentity) -> Option<SocketAddr> {
        self.gateways
            .read()
            .await
            .get(identity)
            .and_then(|info| info.pull_addr)
    }

    /// Gateways that have pulled at least once, with their downlink address
    pub async fn downlink_targets(&self) -> Vec<(GatewayIdentity, SocketAddr)> {
        let gateways = self.gateways.read().await;
        gateways
            .values()
            .filter_map(|info| info.pull_addr.map(|addr| (info.identity, addr)))
            .collect()
    }

    /// Remove gateways silent for longer than `timeout` and return them
    pub async fn remove_silent(&self, now: Instant, timeout: Duration) -> Vec<GatewayIdentity> {
        let mut gateways = self.gateways.write().await;
        let silent: Vec<GatewayIdentity> = gateways
            .values()
            .filter(|info| info.is_silent(now, timeout))
            .map(|info| info.identity)
            .collect();
        for identity in &silent {
            gateways.remove(identity);
        }
        silent
    }

    pub async fn count(&self) -> usize {
        self.gateways.read().await.len()
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(n: u8) -> GatewayIdentity {
        GatewayIdentity::from_mac([0x02, 0, 0, 0, 0, n])
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[tokio::test]
    async fn test_pull_sets_downlink_address() {
        let registry = GatewayRegistry::new();

        assert!(registry.record_push(gateway(1), addr(5000), None).await);
        assert!(registry.pull_address(&gateway(1)).await.is_none());
        assert!(registry.downlink_targets().await.is_empty());

        assert!(!registry.record_pull(gateway(1), addr(5001)).await);
        assert_eq!(registry.pull_address(&gateway(1)).await, Some(addr(5001)));
        assert_eq!(registry.downlink_targets().await, vec![(gateway(1), addr(5001))]);

        let info = registry.get(&gateway(1)).await.unwrap();
        assert_eq!(info.pushes, 1);
        assert_eq!(info.pulls, 1);
    }

    #[tokio::test]
    async fn test_silent_gateways_removed() {
        let registry = GatewayRegistry::new();
        registry.record_pull(gateway(1), addr(5001)).await;
        registry.record_pull(gateway(2), addr(5002)).await;

        let soon = Instant::now() + Duration::from_secs(1);
        assert!(registry.remove_silent(soon, eviction_timeout()).await.is_empty());

        let later = Instant::now() + eviction_timeout() + Duration::from_secs(1);
        let mut removed = registry.remove_silent(later, eviction_timeout()).await;
        removed.sort();
        assert_eq!(removed, vec![gateway(1), gateway(2)]);
        assert_eq!(registry.count().await, 0);
    }

    #[test]
    fn test_eviction_timeout_is_three_keepalives() {
        assert_eq!(eviction_timeout(), Duration::from_secs(93));
    }
}
