//! Downlink dispatch and acknowledgement tracking for the collector
//!
//! This module handles:
//! - Sending PULL_RESP frames to a gateway's pull address
//! - Tracking pending downlinks by token until their PULL_ACK
//! - Retrying unacknowledged downlinks, then dropping them

mod dispatcher;
mod timeout;

pub use dispatcher::DownlinkDispatcher;
pub use timeout::TimeoutTracker;
