//! Radio collaborator
//!
//! The real driver sits behind the `Radio` trait; `UdpRadio` stands in for it
//! during development by carrying packets over a local UDP socket.

mod traits;
mod udp_sim;

pub use traits::{CrcStatus, Radio, RadioError, RadioPacket};
pub use udp_sim::UdpRadio;
