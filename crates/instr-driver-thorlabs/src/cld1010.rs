//! Thorlabs CLD1010LP laser diode controller.
//!
//! Current limits are enforced in two layers: the configured hard maximum
//! for the installed diode, and the instrument's own limit register. The
//! limit register can only be changed safely with the laser off, so
//! [`Cld1010::set_max_current`] turns the output off around the write and
//! restores it afterwards. Turning the laser on requires the TEC to be
//! running first.

use anyhow::{anyhow, Result};
use instr_core::scpi::ScpiConnection;
use instr_core::serial::DynSerial;
use serde::Deserialize;

/// Connection settings for a CLD1010.
#[derive(Debug, Clone, Deserialize)]
pub struct Cld1010Config {
    /// SCPI socket address, `host:port`.
    pub host: String,
    /// Hard current ceiling for the installed diode, in amps.
    pub max_diode_current: f64,
}

/// Thorlabs CLD1010LP laser diode controller.
pub struct Cld1010 {
    conn: ScpiConnection,
    max_diode_current: f64,
    idn: String,
}

/// Laser modulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Off,
    On,
}

impl Cld1010 {
    /// Connect over the LAN SCPI socket.
    pub async fn open(config: &Cld1010Config) -> Result<Self> {
        let conn = ScpiConnection::open_tcp("CLD1010", &config.host).await?;
        Self::init(conn, config.max_diode_current).await
    }

    /// Wrap an already-open transport. Used by tests and simulators.
    pub async fn from_transport(transport: DynSerial, max_diode_current: f64) -> Result<Self> {
        let conn = ScpiConnection::from_transport("CLD1010", transport);
        Self::init(conn, max_diode_current).await
    }

    async fn init(conn: ScpiConnection, max_diode_current: f64) -> Result<Self> {
        let idn = conn.identify().await?;
        tracing::info!(idn = %idn, "Connected to CLD1010");
        Ok(Self {
            conn,
            max_diode_current,
            idn,
        })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    /// Whether the laser diode output is on.
    pub async fn ld_state(&self) -> Result<bool> {
        let reply = self.conn.query("OUTP1:STAT?").await?;
        Ok(reply.trim() != "0")
    }

    async fn set_ld_state(&self, on: bool) -> Result<()> {
        self.conn
            .write(&format!("OUTP1:STAT {}", u8::from(on)))
            .await
    }

    /// Turn the laser on. Fails if the TEC is not running.
    pub async fn on(&self) -> Result<()> {
        if !self.tec_state().await? {
            return Err(anyhow!(
                "CLD1010 temperature controller is disabled; enable the TEC before lasing"
            ));
        }
        self.set_ld_state(true).await
    }

    /// Turn the laser off.
    pub async fn off(&self) -> Result<()> {
        self.set_ld_state(false).await
    }

    /// The instrument's current limit register, in amps.
    pub async fn max_current(&self) -> Result<f64> {
        self.conn.query_f64("SOUR:CURR:LIM:AMPL?").await
    }

    /// Set the current limit register.
    ///
    /// This is the setpoint used while modulation is enabled. The laser is
    /// switched off for the write and restored afterwards.
    pub async fn set_max_current(&self, amps: f64) -> Result<()> {
        if amps > self.max_diode_current {
            return Err(anyhow!(
                "current limit [{amps} A] exceeds the diode maximum [{} A]",
                self.max_diode_current
            ));
        }

        let was_lasing = self.ld_state().await?;
        if was_lasing {
            self.off().await?;
        }

        self.conn
            .write(&format!("SOUR:CURR:LIM:AMPL {amps:.5}"))
            .await?;
        tracing::info!(amps, "CLD1010 current limit set");

        if was_lasing {
            self.on().await?;
        }
        Ok(())
    }

    /// Measured laser diode current, in amps.
    pub async fn measure_current(&self) -> Result<f64> {
        self.conn.query_f64("MEAS:CURR?").await
    }

    /// The programmed current setpoint, in amps.
    pub async fn current_setpoint(&self) -> Result<f64> {
        self.conn.query_f64("SOUR:CURR?").await
    }

    /// Set the current setpoint. Must not exceed the limit register.
    ///
    /// This is the setpoint used while modulation is disabled.
    pub async fn set_current_setpoint(&self, amps: f64) -> Result<()> {
        let max = self.max_current().await?;
        if amps > max {
            return Err(anyhow!(
                "current setpoint [{amps} A] exceeds the limit register [{max} A]"
            ));
        }
        self.conn.write(&format!("SOUR:CURR {amps:.5}")).await
    }

    /// Whether the thermoelectric cooler is running.
    pub async fn tec_state(&self) -> Result<bool> {
        let reply = self.conn.query("OUTP2:STAT?").await?;
        Ok(reply.trim() != "0")
    }

    /// Turn the thermoelectric cooler on or off.
    pub async fn set_tec_state(&self, on: bool) -> Result<()> {
        self.conn
            .write(&format!("OUTP2:STAT {}", u8::from(on)))
            .await
    }

    /// Measured diode temperature, in degrees C.
    pub async fn temperature(&self) -> Result<f64> {
        self.conn.query_f64("MEAS:TEMP?").await
    }

    /// Current amplitude-modulation state.
    pub async fn modulation(&self) -> Result<Modulation> {
        let reply = self.conn.query("SOUR:AM:STAT?").await?;
        match reply.trim() {
            "0" => Ok(Modulation::Off),
            "1" => Ok(Modulation::On),
            other => Err(anyhow!("invalid modulation state reply '{other}'")),
        }
    }

    /// Enable or disable amplitude modulation.
    pub async fn set_modulation(&self, state: Modulation) -> Result<()> {
        let val = match state {
            Modulation::Off => 0,
            Modulation::On => 1,
        };
        self.conn.write(&format!("SOUR:AM:STAT {val}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Scripted CLD1010 peer tracking laser and TEC output state.
    fn spawn_peer(host: tokio::io::DuplexStream, tec_on: bool) -> Arc<AtomicBool> {
        let lasing = Arc::new(AtomicBool::new(false));
        let lasing_peer = lasing.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(host);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let cmd = line.trim().to_string();
                let reply = match cmd.as_str() {
                    "*IDN?" => Some("Thorlabs,CLD1010LP,M00404162,1.04".to_string()),
                    "OUTP1:STAT?" => {
                        Some(u8::from(lasing_peer.load(Ordering::SeqCst)).to_string())
                    }
                    "OUTP1:STAT 1" => {
                        lasing_peer.store(true, Ordering::SeqCst);
                        None
                    }
                    "OUTP1:STAT 0" => {
                        lasing_peer.store(false, Ordering::SeqCst);
                        None
                    }
                    "OUTP2:STAT?" => Some(u8::from(tec_on).to_string()),
                    "SOUR:CURR:LIM:AMPL?" => Some("0.09500".to_string()),
                    "MEAS:CURR?" => Some("0.04312".to_string()),
                    "SOUR:AM:STAT?" => Some("1".to_string()),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let framed = format!("{reply}\n");
                    reader.get_mut().write_all(framed.as_bytes()).await.unwrap();
                }
            }
        });
        lasing
    }

    async fn connect(tec_on: bool) -> (Cld1010, Arc<AtomicBool>) {
        let (host, device) = tokio::io::duplex(1024);
        let lasing = spawn_peer(host, tec_on);
        let laser = Cld1010::from_transport(Box::new(device), 0.1).await.unwrap();
        (laser, lasing)
    }

    #[tokio::test]
    async fn on_requires_tec_running() {
        let (laser, lasing) = connect(false).await;
        let err = laser.on().await.unwrap_err();
        assert!(err.to_string().contains("TEC"));
        assert!(!lasing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn on_enables_output_when_tec_is_up() {
        let (laser, lasing) = connect(true).await;
        laser.on().await.unwrap();
        // Peer processes the write after the next query round-trips.
        laser.ld_state().await.unwrap();
        assert!(lasing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn limit_register_guards_diode_maximum() {
        let (laser, _) = connect(true).await;
        let err = laser.set_max_current(0.2).await.unwrap_err();
        assert!(err.to_string().contains("diode maximum"));
        assert!(laser.set_max_current(0.08).await.is_ok());
    }

    #[tokio::test]
    async fn setpoint_is_checked_against_limit_register() {
        let (laser, _) = connect(true).await;
        // Peer reports a 0.095 A limit.
        let err = laser.set_current_setpoint(0.096).await.unwrap_err();
        assert!(err.to_string().contains("limit register"));
        assert!(laser.set_current_setpoint(0.05).await.is_ok());
    }

    #[tokio::test]
    async fn modulation_state_parses() {
        let (laser, _) = connect(true).await;
        assert_eq!(laser.modulation().await.unwrap(), Modulation::On);
    }
}
