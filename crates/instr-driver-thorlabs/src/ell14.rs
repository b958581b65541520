//! Thorlabs ELL14 rotation mount, in degrees.
//!
//! Wraps [`ElliptecDevice`] with the degree/pulse conversion. The factory
//! calibration (pulses per revolution) can be read from the module's `IN`
//! reply; a value outside the plausible window falls back to the ELL14
//! default of 143360 pulses per revolution.

use crate::elliptec::{DeviceInfo, ElliptecDevice, ElliptecStatus, HomeDirection};
use crate::shared_ports::get_or_open_port;
use anyhow::Result;
use instr_core::serial::SharedPortUnbuffered;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for an ELL14 on a shared bus.
#[derive(Debug, Clone, Deserialize)]
pub struct Ell14Config {
    /// Serial port path, e.g. "/dev/ttyUSB1".
    pub port: String,
    /// Bus address, a single hex character "0".."F".
    pub address: String,
    /// Skip the `IN` calibration query and use this value instead.
    #[serde(default)]
    pub pulses_per_degree: Option<f64>,
}

/// Thorlabs ELL14 rotation mount.
#[derive(Clone)]
pub struct Ell14 {
    dev: ElliptecDevice,
    pulses_per_degree: f64,
}

impl Ell14 {
    /// 143360 pulses per revolution / 360 degrees.
    pub const DEFAULT_PULSES_PER_DEGREE: f64 = 143_360.0 / 360.0;

    /// Open per the config, querying the module for its calibration unless
    /// one was supplied.
    pub async fn open(config: &Ell14Config) -> Result<Self> {
        let port = get_or_open_port(&config.port).await?;
        match config.pulses_per_degree {
            Some(ppd) => Ok(Self::with_calibration(port, &config.address, ppd)),
            None => Self::open_calibrated(port, &config.address).await,
        }
    }

    /// Wrap a shared port with the default calibration.
    pub fn new(port: SharedPortUnbuffered, address: &str) -> Self {
        Self::with_calibration(port, address, Self::DEFAULT_PULSES_PER_DEGREE)
    }

    /// Wrap a shared port with an explicit calibration.
    pub fn with_calibration(port: SharedPortUnbuffered, address: &str, pulses_per_degree: f64) -> Self {
        Self {
            dev: ElliptecDevice::new(port, address),
            pulses_per_degree,
        }
    }

    /// Wrap a shared port, reading the calibration from the `IN` reply.
    pub async fn open_calibrated(port: SharedPortUnbuffered, address: &str) -> Result<Self> {
        let dev = ElliptecDevice::new(port, address);
        let info = dev.device_info().await?;
        let ppd = calibration_from_info(&info);
        tracing::info!(
            address,
            model = %info.model,
            serial = %info.serial,
            pulses_per_degree = ppd,
            "Calibrated ELL14"
        );
        Ok(Self {
            dev,
            pulses_per_degree: ppd,
        })
    }

    pub fn address(&self) -> &str {
        self.dev.address()
    }

    pub fn pulses_per_degree(&self) -> f64 {
        self.pulses_per_degree
    }

    /// The underlying bus device, for raw protocol access.
    pub fn bus_device(&self) -> &ElliptecDevice {
        &self.dev
    }

    fn to_pulses(&self, degrees: f64) -> i32 {
        (degrees * self.pulses_per_degree).round() as i32
    }

    fn to_degrees(&self, pulses: i32) -> f64 {
        f64::from(pulses) / self.pulses_per_degree
    }

    /// Current position in degrees.
    pub async fn position(&self) -> Result<f64> {
        Ok(self.to_degrees(self.dev.position_pulses().await?))
    }

    /// Move to an absolute angle, returning the angle reached.
    pub async fn move_absolute(&self, degrees: f64) -> Result<f64> {
        let reached = self.dev.move_absolute_pulses(self.to_pulses(degrees)).await?;
        Ok(self.to_degrees(reached))
    }

    /// Rotate by a relative angle, returning the angle reached.
    pub async fn move_relative(&self, degrees: f64) -> Result<f64> {
        let reached = self.dev.move_relative_pulses(self.to_pulses(degrees)).await?;
        Ok(self.to_degrees(reached))
    }

    /// Home the mount, returning the angle reached.
    pub async fn home(&self, direction: HomeDirection) -> Result<f64> {
        let reached = self.dev.home(direction).await?;
        Ok(self.to_degrees(reached))
    }

    /// Jog one step forward, returning the angle reached.
    pub async fn jog_forward(&self) -> Result<f64> {
        Ok(self.to_degrees(self.dev.jog_forward().await?))
    }

    /// Jog one step backward, returning the angle reached.
    pub async fn jog_backward(&self) -> Result<f64> {
        Ok(self.to_degrees(self.dev.jog_backward().await?))
    }

    /// Jog step size in degrees.
    pub async fn jog_step(&self) -> Result<f64> {
        Ok(self.to_degrees(self.dev.jog_step_pulses().await?))
    }

    /// Set the jog step size in degrees, returning the value stored.
    pub async fn set_jog_step(&self, degrees: f64) -> Result<f64> {
        let stored = self.dev.set_jog_step_pulses(self.to_pulses(degrees)).await?;
        Ok(self.to_degrees(stored))
    }

    pub async fn stop(&self) -> Result<()> {
        self.dev.stop().await
    }

    pub async fn status(&self) -> Result<ElliptecStatus> {
        self.dev.status().await
    }

    /// Wait until the mount reports settled, up to 10 s.
    pub async fn wait_settled(&self) -> Result<()> {
        self.dev.wait_settled(Duration::from_secs(10)).await
    }
}

/// Pulses per degree from an `IN` reply, with a plausibility window.
fn calibration_from_info(info: &DeviceInfo) -> f64 {
    let ppd = f64::from(info.pulses_per_unit) / 360.0;
    if (100.0..1000.0).contains(&ppd) {
        ppd
    } else {
        tracing::warn!(
            pulses_per_unit = info.pulses_per_unit,
            parsed_ppd = ppd,
            "Implausible ELL14 calibration, using default"
        );
        Ell14::DEFAULT_PULSES_PER_DEGREE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instr_core::serial::wrap_shared_unbuffered;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn default_calibration_matches_one_revolution() {
        let (_, port) = tokio::io::duplex(16);
        let ell = Ell14::new(wrap_shared_unbuffered(Box::new(port)), "0");
        assert_eq!(ell.to_pulses(360.0), 143_360);
        assert_eq!(ell.to_pulses(45.0), 17_920);
        assert!((ell.to_degrees(17_920) - 45.0).abs() < 1e-9);
        assert_eq!(ell.to_pulses(-45.0), -17_920);
    }

    #[test]
    fn implausible_in_calibration_falls_back() {
        let info = DeviceInfo {
            model: "0E".into(),
            serial: "00000000".into(),
            year: "2023".into(),
            firmware: "17".into(),
            hardware: "01".into(),
            travel: 360,
            pulses_per_unit: 7,
        };
        assert!(
            (calibration_from_info(&info) - Ell14::DEFAULT_PULSES_PER_DEGREE).abs()
                < f64::EPSILON
        );

        let good = DeviceInfo {
            pulses_per_unit: 143_360,
            ..info
        };
        assert!((calibration_from_info(&good) - 398.222).abs() < 1e-2);
    }

    #[tokio::test]
    async fn move_absolute_round_trips_degrees() {
        let (mut host, port) = tokio::io::duplex(256);
        let ell = Ell14::new(wrap_shared_unbuffered(Box::new(port)), "2");

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            // 45 deg * 398.222... = 17920 pulses
            assert_eq!(&buf[..n], b"2ma00004600");
            host.write_all(b"2PO00004600\r\n").await.unwrap();
        });

        let reached = ell.move_absolute(45.0).await.unwrap();
        assert!((reached - 45.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn open_calibrated_reads_in_reply() {
        let (mut host, port) = tokio::io::duplex(256);

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"2in");
            host.write_all(b"2IN0E1140051720231701016800023000\r\n")
                .await
                .unwrap();
        });

        let ell = Ell14::open_calibrated(wrap_shared_unbuffered(Box::new(port)), "2")
            .await
            .unwrap();
        assert!((ell.pulses_per_degree() - 398.222).abs() < 1e-2);
    }
}
