//! Backend-to-radio path

pub mod policy;
pub mod receiver;

pub use receiver::DownlinkReceiver;
