//! Rigol DP832 triple-output programmable power supply.
//!
//! Every set command goes through a status-checked write (`*WAI` then
//! `*ESR?`), and voltage/current setpoints can optionally be confirmed by
//! polling the matching measurement until it converges. The DP832 enables
//! its output relay asynchronously, so confirmation is how callers know the
//! rail actually reached the programmed value.

use anyhow::Result;
use instr_core::error::InstrumentError;
use instr_core::scpi::{ScpiConnection, Settle};
use instr_core::serial::DynSerial;
use serde::Deserialize;
use std::time::Duration;

/// Number of output channels on a DP832.
pub const NUM_CHANNELS: u8 = 3;

fn default_voltage_delta() -> f64 {
    0.03
}
fn default_voltage_timeout_ms() -> u64 {
    2000
}
fn default_current_delta() -> f64 {
    0.02
}
fn default_current_timeout_ms() -> u64 {
    1000
}

/// Connection settings and settling tolerances.
#[derive(Debug, Clone, Deserialize)]
pub struct Dp832Config {
    /// SCPI socket address, `host:port` (the DP832 listens on 5555).
    pub host: String,
    /// Acceptable delta from the voltage setpoint (volts).
    #[serde(default = "default_voltage_delta")]
    pub voltage_delta: f64,
    /// Max time for a voltage setpoint to converge.
    #[serde(default = "default_voltage_timeout_ms")]
    pub voltage_timeout_ms: u64,
    /// Acceptable delta from the current setpoint (amps).
    #[serde(default = "default_current_delta")]
    pub current_delta: f64,
    /// Max time for a current setpoint to converge.
    #[serde(default = "default_current_timeout_ms")]
    pub current_timeout_ms: u64,
}

impl Dp832Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            voltage_delta: default_voltage_delta(),
            voltage_timeout_ms: default_voltage_timeout_ms(),
            current_delta: default_current_delta(),
            current_timeout_ms: default_current_timeout_ms(),
        }
    }
}

/// Whether a setpoint write should wait for the measurement to converge.
#[derive(Debug, Clone, Copy)]
pub enum Confirm {
    /// Fire and forget.
    Off,
    /// Poll the measurement with the configured default tolerances.
    Default,
    /// Poll with caller-supplied criteria.
    Within(Settle),
}

/// Rigol DP832 programmable power supply.
pub struct Dp832 {
    conn: ScpiConnection,
    config: Dp832Config,
    idn: String,
}

impl Dp832 {
    /// Connect over the LAN SCPI socket and configure the event registers.
    pub async fn open(config: Dp832Config) -> Result<Self> {
        let conn = ScpiConnection::open_tcp("DP832", &config.host)
            .await?
            .with_questionable_status();
        Self::init(conn, config).await
    }

    /// Wrap an already-open transport. Used by tests and simulators.
    pub async fn from_transport(transport: DynSerial, config: Dp832Config) -> Result<Self> {
        let conn = ScpiConnection::from_transport("DP832", transport).with_questionable_status();
        Self::init(conn, config).await
    }

    async fn init(conn: ScpiConnection, config: Dp832Config) -> Result<Self> {
        let idn = conn.identify().await?;
        tracing::info!(idn = %idn, "Connected to DP832");
        // Forward operation-complete, query, execution, command and power-on
        // events to the ESR; summarize ESR and error queue in the STB.
        conn.configure_event_registers(1 | 4 | 8 | 16 | 32, 8 | 32)
            .await?;
        Ok(Self { conn, config, idn })
    }

    /// The `*IDN?` string captured at connect time.
    pub fn idn(&self) -> &str {
        &self.idn
    }

    fn check_channel(ch: u8) -> Result<()> {
        if (1..=NUM_CHANNELS).contains(&ch) {
            Ok(())
        } else {
            Err(InstrumentError::ChannelOutOfRange {
                channel: ch,
                max: NUM_CHANNELS,
            }
            .into())
        }
    }

    fn voltage_settle(&self) -> Settle {
        Settle::within(
            self.config.voltage_delta,
            Duration::from_millis(self.config.voltage_timeout_ms),
        )
    }

    fn current_settle(&self) -> Settle {
        Settle::within(
            self.config.current_delta,
            Duration::from_millis(self.config.current_timeout_ms),
        )
    }

    /// Turn a channel's output relay on or off.
    pub async fn set_output(&self, ch: u8, on: bool) -> Result<()> {
        Self::check_channel(ch)?;
        let state = if on { "ON" } else { "OFF" };
        self.conn.checked_write(&format!(":OUTP CH{ch},{state}")).await
    }

    /// Program the channel voltage, optionally waiting for convergence.
    pub async fn set_voltage(&self, ch: u8, volts: f64, confirm: Confirm) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":SOUR{ch}:VOLT {volts}"))
            .await?;
        tracing::info!(ch, volts, "DP832 voltage setpoint");
        let settle = match confirm {
            Confirm::Off => return Ok(()),
            Confirm::Default => self.voltage_settle(),
            Confirm::Within(s) => s,
        };
        settle
            .until(&format!("DP832 ch{ch} voltage"), volts, || {
                self.measure_voltage(ch)
            })
            .await?;
        Ok(())
    }

    /// Program the channel current limit, optionally waiting for convergence.
    pub async fn set_current(&self, ch: u8, amps: f64, confirm: Confirm) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":SOUR{ch}:CURR {amps}"))
            .await?;
        tracing::info!(ch, amps, "DP832 current setpoint");
        let settle = match confirm {
            Confirm::Off => return Ok(()),
            Confirm::Default => self.current_settle(),
            Confirm::Within(s) => s,
        };
        settle
            .until(&format!("DP832 ch{ch} current"), amps, || {
                self.measure_current(ch)
            })
            .await?;
        Ok(())
    }

    /// The programmed voltage setpoint (not the measured value).
    pub async fn voltage_setpoint(&self, ch: u8) -> Result<f64> {
        Self::check_channel(ch)?;
        self.conn.query_f64(&format!(":SOUR{ch}:VOLT?")).await
    }

    /// The programmed current setpoint (not the measured value).
    pub async fn current_setpoint(&self, ch: u8) -> Result<f64> {
        Self::check_channel(ch)?;
        self.conn.query_f64(&format!(":SOUR{ch}:CURR?")).await
    }

    /// Measured output voltage in volts.
    pub async fn measure_voltage(&self, ch: u8) -> Result<f64> {
        Self::check_channel(ch)?;
        self.conn.query_f64(&format!(":MEAS:VOLT? CH{ch}")).await
    }

    /// Measured output current in amps.
    pub async fn measure_current(&self, ch: u8) -> Result<f64> {
        Self::check_channel(ch)?;
        self.conn.query_f64(&format!(":MEAS:CURR? CH{ch}")).await
    }

    /// Measured output power in watts.
    pub async fn measure_power(&self, ch: u8) -> Result<f64> {
        Self::check_channel(ch)?;
        self.conn.query_f64(&format!(":MEAS:POWE? CH{ch}")).await
    }

    /// Set the over-voltage protection threshold in volts.
    pub async fn set_ovp_limit(&self, ch: u8, volts: f64) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":OUTP:OVP:VAL CH{ch},{volts}"))
            .await
    }

    /// Enable or disable over-voltage protection.
    pub async fn set_ovp_enabled(&self, ch: u8, on: bool) -> Result<()> {
        Self::check_channel(ch)?;
        let state = if on { "ON" } else { "OFF" };
        self.conn
            .checked_write(&format!(":OUTP:OVP CH{ch},{state}"))
            .await
    }

    /// Whether an over-voltage protection trip has occurred.
    pub async fn ovp_alarm(&self, ch: u8) -> Result<bool> {
        Self::check_channel(ch)?;
        let reply = self.conn.query(&format!(":OUTP:OVP:ALAR? CH{ch}")).await?;
        parse_alarm(&reply, "OVP")
    }

    /// Clear a tripped over-voltage protection alarm.
    pub async fn clear_ovp_alarm(&self, ch: u8) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":OUTP:OVP:CLEAR CH{ch}"))
            .await
    }

    /// Set the over-current protection threshold in amps.
    pub async fn set_ocp_limit(&self, ch: u8, amps: f64) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":OUTP:OCP:VAL CH{ch},{amps}"))
            .await
    }

    /// Enable or disable over-current protection.
    pub async fn set_ocp_enabled(&self, ch: u8, on: bool) -> Result<()> {
        Self::check_channel(ch)?;
        let state = if on { "ON" } else { "OFF" };
        self.conn
            .checked_write(&format!(":OUTP:OCP CH{ch},{state}"))
            .await
    }

    /// Whether an over-current protection trip has occurred.
    pub async fn ocp_alarm(&self, ch: u8) -> Result<bool> {
        Self::check_channel(ch)?;
        let reply = self.conn.query(&format!(":OUTP:OCP:ALAR? CH{ch}")).await?;
        parse_alarm(&reply, "OCP")
    }

    /// Clear a tripped over-current protection alarm.
    pub async fn clear_ocp_alarm(&self, ch: u8) -> Result<()> {
        Self::check_channel(ch)?;
        self.conn
            .checked_write(&format!(":OUTP:OCP:CLEAR CH{ch}"))
            .await
    }
}

fn parse_alarm(reply: &str, kind: &str) -> Result<bool> {
    match reply {
        "YES" => Ok(true),
        "NO" => Ok(false),
        other => Err(InstrumentError::UnexpectedReply {
            detail: format!("{kind} alarm query returned '{other}'"),
        }
        .into()),
    }
}
