//! Rigol instrument drivers.
//!
//! Two families are covered:
//! - [`dp832::Dp832`]: the DP832 triple-output programmable power supply,
//!   with status-checked writes and measure-until-settled setpoints.
//! - [`ds1000z::Ds1000z`]: the DS1000Z oscilloscope series, including
//!   blockwise waveform download and screenshot capture.
//!
//! Both talk raw SCPI over the instrument's LAN socket.

pub mod dp832;
pub mod ds1000z;

pub use dp832::{Confirm, Dp832, Dp832Config, NUM_CHANNELS};
pub use ds1000z::{
    AcquireMode, ChannelUnits, Coupling, Ds1000z, ImageFormat, MemoryDepth, TimebaseMode,
    Waveform, WaveformMode, WaveformPreamble,
};
