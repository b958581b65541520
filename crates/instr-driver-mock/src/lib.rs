//! In-memory instrument simulators.
//!
//! Each simulator runs as a spawned task on one end of a `tokio::io::duplex`
//! pair and hands back the other end as a [`DynSerial`](instr_core::serial::DynSerial),
//! so any driver in the workspace can run against it through its
//! `from_transport` constructor. Used by integration tests and by the GUI's
//! demo mode.

pub mod elliptec_sim;
pub mod scpi_sim;

pub use elliptec_sim::{SimElliptec, SimElliptecConfig};
pub use scpi_sim::{SimPowerSupply, SimPowerSupplyConfig};
