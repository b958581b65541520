//! Thorlabs ELLA1 linear stage, in millimeters.
//!
//! Same bus protocol as the rotation mount, but the native unit is mm and
//! the pulses-per-mm calibration varies by module, so it is read from the
//! `IN` reply at open. Jogging (`fw`/`bw`) is the usual way to step this
//! stage between its positions.

use crate::elliptec::{DeviceInfo, ElliptecDevice, ElliptecStatus, HomeDirection};
use crate::shared_ports::get_or_open_port;
use anyhow::Result;
use instr_core::serial::SharedPortUnbuffered;
use std::time::Duration;

/// Thorlabs ELLA1 linear stage.
#[derive(Clone)]
pub struct Ella1 {
    dev: ElliptecDevice,
    pulses_per_mm: f64,
}

impl Ella1 {
    /// Open on a shared bus, reading the calibration from the module.
    pub async fn open(port_path: &str, address: &str) -> Result<Self> {
        let port = get_or_open_port(port_path).await?;
        Self::open_calibrated(port, address).await
    }

    /// Wrap a shared port with an explicit pulses-per-mm calibration.
    pub fn with_calibration(port: SharedPortUnbuffered, address: &str, pulses_per_mm: f64) -> Self {
        Self {
            dev: ElliptecDevice::new(port, address),
            pulses_per_mm,
        }
    }

    /// Wrap a shared port, reading the calibration from the `IN` reply.
    pub async fn open_calibrated(port: SharedPortUnbuffered, address: &str) -> Result<Self> {
        let dev = ElliptecDevice::new(port, address);
        let info = dev.device_info().await?;
        let ppm = calibration_from_info(&info);
        tracing::info!(
            address,
            model = %info.model,
            travel_mm = info.travel,
            pulses_per_mm = ppm,
            "Calibrated ELLA1"
        );
        Ok(Self {
            dev,
            pulses_per_mm: ppm,
        })
    }

    pub fn address(&self) -> &str {
        self.dev.address()
    }

    pub fn pulses_per_mm(&self) -> f64 {
        self.pulses_per_mm
    }

    /// The underlying bus device, for raw protocol access.
    pub fn bus_device(&self) -> &ElliptecDevice {
        &self.dev
    }

    fn to_pulses(&self, mm: f64) -> i32 {
        (mm * self.pulses_per_mm).round() as i32
    }

    fn to_mm(&self, pulses: i32) -> f64 {
        f64::from(pulses) / self.pulses_per_mm
    }

    /// Current position in mm.
    pub async fn position(&self) -> Result<f64> {
        Ok(self.to_mm(self.dev.position_pulses().await?))
    }

    /// Move to an absolute position, returning the position reached.
    pub async fn move_absolute(&self, mm: f64) -> Result<f64> {
        let reached = self.dev.move_absolute_pulses(self.to_pulses(mm)).await?;
        Ok(self.to_mm(reached))
    }

    /// Move by a relative distance, returning the position reached.
    pub async fn move_relative(&self, mm: f64) -> Result<f64> {
        let reached = self.dev.move_relative_pulses(self.to_pulses(mm)).await?;
        Ok(self.to_mm(reached))
    }

    /// Home the stage, returning the position reached.
    pub async fn home(&self) -> Result<f64> {
        let reached = self.dev.home(HomeDirection::Clockwise).await?;
        Ok(self.to_mm(reached))
    }

    /// Step forward by one jog, returning the position reached.
    pub async fn move_forward(&self) -> Result<f64> {
        Ok(self.to_mm(self.dev.jog_forward().await?))
    }

    /// Step backward by one jog, returning the position reached.
    pub async fn move_backward(&self) -> Result<f64> {
        Ok(self.to_mm(self.dev.jog_backward().await?))
    }

    pub async fn status(&self) -> Result<ElliptecStatus> {
        self.dev.status().await
    }

    /// Persist the current address across power cycles.
    pub async fn save_user_data(&self) -> Result<()> {
        self.dev.save_user_data().await
    }

    /// Wait until the stage reports settled, up to 10 s.
    pub async fn wait_settled(&self) -> Result<()> {
        self.dev.wait_settled(Duration::from_secs(10)).await
    }
}

/// Pulses per mm from an `IN` reply. A zero field would make every
/// conversion degenerate, so it falls back to 1 pulse/mm with a warning.
fn calibration_from_info(info: &DeviceInfo) -> f64 {
    if info.pulses_per_unit == 0 {
        tracing::warn!("ELLA1 reported zero pulses per mm, using 1.0");
        1.0
    } else {
        f64::from(info.pulses_per_unit)
    }
}
