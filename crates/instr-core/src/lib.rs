//! Shared plumbing for the lab-instruments driver crates.
//!
//! This crate does not define a device abstraction. Each driver exposes
//! methods mirroring its instrument's native command set; what lives here is
//! the I/O plumbing those drivers have in common:
//!
//! - [`error`]: the [`InstrumentError`](error::InstrumentError) type raised
//!   for connection failures, device-reported command faults, and setpoint
//!   convergence timeouts.
//! - [`serial`]: type-erased async serial ports so drivers work over real
//!   hardware (`tokio-serial`) and in-memory duplex pairs in tests.
//! - [`scpi`]: a line-oriented SCPI connection with status-register checked
//!   writes, IEEE-488.2 block reads, and the [`Settle`](scpi::Settle)
//!   setpoint-polling helper.

pub mod error;
pub mod scpi;
pub mod serial;

pub use error::InstrumentError;
pub use scpi::{Settle, ScpiConnection};
pub use serial::{DynSerial, SerialPortIO, SharedPort, SharedPortUnbuffered};
