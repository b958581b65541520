//! Thorlabs PM100D optical power meter.

use anyhow::Result;
use instr_core::scpi::ScpiConnection;
use instr_core::serial::DynSerial;

/// Thorlabs PM100D power meter console.
pub struct Pm100d {
    conn: ScpiConnection,
    idn: String,
}

impl Pm100d {
    /// Connect over the LAN SCPI socket.
    pub async fn open(host: &str) -> Result<Self> {
        let conn = ScpiConnection::open_tcp("PM100D", host).await?;
        Self::init(conn).await
    }

    /// Wrap an already-open transport. Used by tests and simulators.
    pub async fn from_transport(transport: DynSerial) -> Result<Self> {
        let conn = ScpiConnection::from_transport("PM100D", transport);
        Self::init(conn).await
    }

    async fn init(conn: ScpiConnection) -> Result<Self> {
        let idn = conn.identify().await?;
        tracing::info!(idn = %idn, "Connected to PM100D");
        Ok(Self { conn, idn })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    /// Measured optical power in watts.
    pub async fn power(&self) -> Result<f64> {
        self.conn.query_f64("MEAS:POW?").await
    }

    /// The wavelength used for the sensor's responsivity correction, in nm.
    pub async fn correction_wavelength(&self) -> Result<f64> {
        self.conn.query_f64("SENS:CORR:WAV?").await
    }

    /// Set the correction wavelength in nm.
    pub async fn set_correction_wavelength(&self, nanometers: f64) -> Result<()> {
        self.conn
            .write(&format!("SENS:CORR:WAV {nanometers}"))
            .await
    }

    /// The sensor's supported correction wavelength range `(min, max)` in nm.
    pub async fn correction_wavelength_range(&self) -> Result<(f64, f64)> {
        let min = self.conn.query_f64("SENS:CORR:WAV? MIN").await?;
        let max = self.conn.query_f64("SENS:CORR:WAV? MAX").await?;
        Ok((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn spawn_peer(host: tokio::io::DuplexStream) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(host);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let reply = match line.trim() {
                    "*IDN?" => Some("Thorlabs,PM100D,P0024208,2.4.0"),
                    "MEAS:POW?" => Some("1.234e-3"),
                    "SENS:CORR:WAV?" => Some("637.0"),
                    "SENS:CORR:WAV? MIN" => Some("400.0"),
                    "SENS:CORR:WAV? MAX" => Some("1100.0"),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let framed = format!("{reply}\n");
                    reader.get_mut().write_all(framed.as_bytes()).await.unwrap();
                }
            }
        });
    }

    async fn connect() -> Pm100d {
        let (host, device) = tokio::io::duplex(512);
        spawn_peer(host);
        Pm100d::from_transport(Box::new(device)).await.unwrap()
    }

    #[tokio::test]
    async fn power_reading_parses_scientific_notation() {
        let meter = connect().await;
        assert!((meter.power().await.unwrap() - 1.234e-3).abs() < 1e-12);
    }

    #[tokio::test]
    async fn wavelength_range_queries_min_and_max() {
        let meter = connect().await;
        let (min, max) = meter.correction_wavelength_range().await.unwrap();
        assert!((min - 400.0).abs() < f64::EPSILON);
        assert!((max - 1100.0).abs() < f64::EPSILON);
    }
}
