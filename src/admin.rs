//! Administrative access to the bridge statistics
//!
//! The bridge loop owns the counters. Other tasks (the periodic stats logger,
//! a status page) ask for them through an `AdminHandle`; the loop answers at
//! most one request per iteration without ever waiting on the channel.

use crate::stats::{StatsCounters, StatsSnapshot};
use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Pending requests allowed before `AdminHandle` callers wait
pub const ADMIN_QUEUE_DEPTH: usize = 16;

/// One request, carrying the channel its answer goes back on
#[derive(Debug)]
pub enum AdminRequest {
    Stats(oneshot::Sender<StatsSnapshot>),
    /// Zero every counter; answered with the values from just before
    Reset(oneshot::Sender<StatsSnapshot>),
}

impl AdminRequest {
    /// Answer the request against the live counters
    pub fn serve(self, stats: &mut StatsCounters) {
        match self {
            AdminRequest::Stats(reply) => {
                // The requester may have given up; nothing to do then
                let _ = reply.send(stats.snapshot());
            }
            AdminRequest::Reset(reply) => {
                let before = stats.snapshot();
                stats.reset();
                info!("[ADMIN] Statistics reset (had {} received, {} forwarded)", before.rx_received, before.forwarded);
                let _ = reply.send(before);
            }
        }
    }
}

/// Cloneable client side
#[derive(Debug, Clone)]
pub struct AdminHandle {
    tx: mpsc::Sender<AdminRequest>,
}

impl AdminHandle {
    /// Current statistics
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let (reply, answer) = oneshot::channel();
        self.request(AdminRequest::Stats(reply)).await?;
        answer.await.map_err(|_| anyhow!("Bridge loop dropped the request"))
    }

    /// Reset all counters, returning their values before the reset
    pub async fn reset(&self) -> Result<StatsSnapshot> {
        let (reply, answer) = oneshot::channel();
        self.request(AdminRequest::Reset(reply)).await?;
        answer.await.map_err(|_| anyhow!("Bridge loop dropped the request"))
    }

    async fn request(&self, request: AdminRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("Bridge loop closed"))
    }
}

/// Loop side of the admin channel
#[derive(Debug)]
pub struct AdminInbox {
    rx: mpsc::Receiver<AdminRequest>,
}

impl AdminInbox {
    /// Take one queued request without waiting
    pub fn try_next(&mut self) -> Option<AdminRequest> {
        self.rx.try_recv().ok()
    }
}

pub fn channel() -> (AdminHandle, AdminInbox) {
    let (tx, rx) = mpsc::channel(ADMIN_QUEUE_DEPTH);
    (AdminHandle { tx }, AdminInbox { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve_one(inbox: &mut AdminInbox, stats: &mut StatsCounters) {
        loop {
            if let Some(request) = inbox.try_next() {
                request.serve(stats);
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_stats_request() {
        let (handle, mut inbox) = channel();
        let mut stats = StatsCounters::new();
        stats.record_received();
        stats.record_forwarded();

        let client = tokio::spawn(async move { handle.stats().await });
        serve_one(&mut inbox, &mut stats).await;

        let snap = client.await.unwrap().unwrap();
        assert_eq!(snap.rx_received, 1);
        assert_eq!(snap.forwarded, 1);
    }

    #[tokio::test]
    async fn test_reset_request() {
        let (handle, mut inbox) = channel();
        let mut stats = StatsCounters::new();
        stats.record_received();

        let client = tokio::spawn(async move { handle.reset().await });
        serve_one(&mut inbox, &mut stats).await;

        assert_eq!(client.await.unwrap().unwrap().rx_received, 1);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_closed_loop_is_an_error() {
        let (handle, inbox) = channel();
        drop(inbox);
        assert!(handle.stats().await.is_err());
    }

    #[test]
    fn test_empty_inbox() {
        let (_handle, mut inbox) = channel();
        assert!(inbox.try_next().is_none());
    }
}
