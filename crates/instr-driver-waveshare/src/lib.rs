//! Waveshare Modbus POE ETH relay driver.
//!
//! The 8-channel relay board speaks Modbus over TCP in two flavors: RTU
//! frames tunneled through a transparent socket on port 4196 (CRC-checked),
//! or standard Modbus TCP with MBAP headers on port 502. [`relay::Relay`]
//! supports both.

pub mod crc;
pub mod relay;

pub use relay::{Framing, Relay, RelayConfig, NUM_CHANNELS};
