//! Gateway tracking for the collector
//!
//! This module handles:
//! - Tracking every gateway by its identity
//! - Remembering where each gateway pulls downlinks from
//! - Evicting gateways that stop sending keepalives

mod gateway;
mod registry;

pub use registry::{eviction_timeout, GatewayRegistry};
