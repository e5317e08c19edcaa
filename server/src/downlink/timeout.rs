//! Timeout tracking for pending downlinks

use super::dispatcher::DownlinkDispatcher;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::warn;

/// Monitors downlink acknowledgements and triggers retries
pub struct TimeoutTracker {
    dispatcher: Arc<DownlinkDispatcher>,
    check_interval: Duration,
}

impl TimeoutTracker {
    pub fn new(dispatcher: Arc<DownlinkDispatcher>) -> Self {
        Self {
            dispatcher,
            check_interval: Duration::from_millis(500),
        }
    }

    /// Start the timeout monitoring loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;
            self.check(Instant::now()).await;
        }
    }

    /// Retry or abandon every overdue downlink
    pub async fn check(&self, now: Instant) -> usize {
        let overdue = self.dispatcher.timed_out(now).await;
        let count = overdue.len();

        for downlink in overdue {
            if downlink.can_retry() {
                if let Err(e) = self.dispatcher.retry(downlink.token).await {
                    warn!("Retry failed for downlink {:04x}: {}", downlink.token, e);
                }
            } else {
                self.dispatcher.abandon(downlink.token).await;
                warn!(
                    "Downlink {:04x} to {} unacknowledged after {} retries, dropped",
                    downlink.token, downlink.identity, downlink.retries
                );
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downlink::dispatcher::ack_timeout;
    use crate::session::GatewayRegistry;
    use bytes::Bytes;
    use onechan_shared::{timing, GatewayIdentity};
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_overdue_downlinks_retried_then_dropped() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let gateway = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let registry = Arc::new(GatewayRegistry::new());
        let identity = GatewayIdentity::from_mac([0x02, 0, 0, 0, 0, 1]);
        registry.record_pull(identity, gateway.local_addr().unwrap()).await;

        let dispatcher = Arc::new(DownlinkDispatcher::new(socket, registry));
        dispatcher
            .send_downlink(identity, Bytes::from_static(b"x"))
            .await
            .unwrap();
        let tracker = TimeoutTracker::new(dispatcher.clone());

        // Not yet overdue
        assert_eq!(tracker.check(Instant::now()).await, 0);

        for _ in 0..timing::DOWNLINK_MAX_RETRIES {
            let later = Instant::now() + ack_timeout();
            assert_eq!(tracker.check(later).await, 1);
            assert_eq!(dispatcher.pending_count().await, 1);
        }

        let later = Instant::now() + ack_timeout();
        assert_eq!(tracker.check(later).await, 1);
        assert_eq!(dispatcher.pending_count().await, 0);
    }
}
