//! Connectivity supervision

pub mod supervisor;

pub use supervisor::ConnectivitySupervisor;
