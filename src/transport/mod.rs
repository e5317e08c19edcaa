pub mod link;
pub mod traits;
pub mod udp;

pub use link::HostLink;
pub use traits::{DatagramTransport, LinkControl};
pub use udp::UdpTransport;
