//! Error types shared by the instrument drivers.
//!
//! Drivers return `anyhow::Result` from their public methods, attaching
//! context as they go; the variants here are the structured failures that
//! callers may want to match on (GUI workers display `SetpointTimeout`
//! differently from a dead connection, for example).

use std::time::Duration;
use thiserror::Error;

/// Structured errors raised by the instrument drivers.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// Opening the connection to the device failed.
    #[error("Failed connecting to {device} @ [{detail}]")]
    Connection { device: String, detail: String },

    /// The device's standard event register reported a syntax fault
    /// (ESR bit 5) after a command was sent.
    #[error("Command [{cmd}] contains a syntax error")]
    CommandSyntax { cmd: String },

    /// The device's standard event register reported an execution fault
    /// (ESR bit 4) after a command was sent.
    #[error("Command [{cmd}] execution error")]
    CommandExecution { cmd: String },

    /// A measured value did not converge to its setpoint in time.
    #[error(
        "Measured {name} [{actual}] did not reach setpoint [{target}] within {timeout:?}"
    )]
    SetpointTimeout {
        name: String,
        target: f64,
        actual: f64,
        timeout: Duration,
    },

    /// A device reply could not be parsed.
    #[error("Failed to parse reply: {detail}")]
    Parse { detail: String },

    /// The device replied with something outside its documented vocabulary.
    #[error("Unexpected reply: {detail}")]
    UnexpectedReply { detail: String },

    /// A channel index outside the device's range was requested.
    #[error("Channel {channel} out of range (device has channels up to {max})")]
    ChannelOutOfRange { channel: u8, max: u8 },

    /// Underlying transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted on a connection that has been closed.
    #[error("Device connection closed")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_command() {
        let err = InstrumentError::CommandSyntax {
            cmd: ":SOUR1:VOLT 1.5".into(),
        };
        assert!(err.to_string().contains(":SOUR1:VOLT 1.5"));
    }

    #[test]
    fn setpoint_timeout_display() {
        let err = InstrumentError::SetpointTimeout {
            name: "voltage".into(),
            target: 3.3,
            actual: 1.1,
            timeout: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("voltage"));
        assert!(msg.contains("3.3"));
    }
}
