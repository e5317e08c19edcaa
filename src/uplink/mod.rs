//! Radio-to-backend path

pub mod forwarder;
pub mod tokens;

pub use forwarder::{ResolvedTarget, SendReport, UplinkForwarder};
pub use tokens::TokenTracker;
