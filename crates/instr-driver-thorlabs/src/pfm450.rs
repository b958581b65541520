//! Thorlabs PFM450E precision piezo objective scanner.
//!
//! The controller is driven through vendor tooling, so the transport lives
//! behind the [`PiezoChannel`] trait; this module owns what is portable:
//! control modes, travel and resolution per mode, and the conversion between
//! the controller's raw ±32767 position units and microns.

use anyhow::Result;
use async_trait::async_trait;

/// Closed-loop travel in microns.
pub const CLOSED_LOOP_RANGE_UM: f64 = 450.0;
/// Open-loop travel in microns.
pub const OPEN_LOOP_RANGE_UM: f64 = 600.0;
/// Closed-loop resolution in microns.
pub const CLOSED_LOOP_RESOLUTION_UM: f64 = 0.003;
/// Open-loop resolution in microns.
pub const OPEN_LOOP_RESOLUTION_UM: f64 = 0.001;
/// Raw position full scale: positions run -32767..=32767.
pub const POSITION_SCALE: i32 = 32_767;

/// Position control modes of the piezo controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ControlMode {
    Undefined = 0,
    OpenLoop = 1,
    ClosedLoop = 2,
    OpenLoopSmooth = 3,
    ClosedLoopSmooth = 4,
}

impl ControlMode {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            1 => Self::OpenLoop,
            2 => Self::ClosedLoop,
            3 => Self::OpenLoopSmooth,
            4 => Self::ClosedLoopSmooth,
            _ => Self::Undefined,
        }
    }

    /// Whether the feedback loop is open in this mode.
    pub fn is_open_loop(self) -> bool {
        matches!(self, Self::OpenLoop | Self::OpenLoopSmooth)
    }
}

/// Backend transport for one piezo channel.
///
/// Production backends wrap the controller's command interface; tests use
/// an in-memory implementation.
#[async_trait]
pub trait PiezoChannel: Send + Sync {
    async fn enable(&self) -> Result<()>;
    async fn disable(&self) -> Result<()>;
    /// Raw position in controller units, -32767..=32767.
    async fn position_raw(&self) -> Result<i32>;
    /// Command a raw position. Implementations receive pre-clamped values.
    async fn set_position_raw(&self, raw: i32) -> Result<()>;
    async fn control_mode(&self) -> Result<ControlMode>;
    async fn set_control_mode(&self, mode: ControlMode) -> Result<()>;
}

/// PFM450E piezo scanner over a [`PiezoChannel`] backend.
pub struct Pfm450<B: PiezoChannel> {
    backend: B,
}

impl<B: PiezoChannel> Pfm450<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn enable(&self) -> Result<()> {
        self.backend.enable().await
    }

    pub async fn disable(&self) -> Result<()> {
        self.backend.disable().await
    }

    pub async fn control_mode(&self) -> Result<ControlMode> {
        self.backend.control_mode().await
    }

    pub async fn set_control_mode(&self, mode: ControlMode) -> Result<()> {
        self.backend.set_control_mode(mode).await
    }

    /// Maximum travel in microns for the current control mode.
    pub async fn max_travel_um(&self) -> Result<f64> {
        let mode = self.backend.control_mode().await?;
        Ok(range_for_mode(mode))
    }

    /// Position resolution in microns for the current control mode.
    pub async fn resolution_um(&self) -> Result<f64> {
        let mode = self.backend.control_mode().await?;
        Ok(if mode.is_open_loop() {
            OPEN_LOOP_RESOLUTION_UM
        } else {
            CLOSED_LOOP_RESOLUTION_UM
        })
    }

    /// Raw position in controller units.
    pub async fn position_raw(&self) -> Result<i32> {
        self.backend.position_raw().await
    }

    /// Command a raw position, clamped to ±32767.
    pub async fn set_position_raw(&self, raw: i32) -> Result<()> {
        self.backend
            .set_position_raw(raw.clamp(-POSITION_SCALE, POSITION_SCALE))
            .await
    }

    /// Position in microns, signed about the travel midpoint.
    pub async fn position_um(&self) -> Result<f64> {
        let mode = self.backend.control_mode().await?;
        let raw = self.backend.position_raw().await?;
        Ok(raw_to_microns(raw, mode))
    }

    /// Command a position in microns. Out-of-travel targets are clamped.
    pub async fn set_position_um(&self, microns: f64) -> Result<()> {
        let mode = self.backend.control_mode().await?;
        self.backend
            .set_position_raw(microns_to_raw(microns, mode))
            .await
    }
}

fn range_for_mode(mode: ControlMode) -> f64 {
    if mode.is_open_loop() {
        OPEN_LOOP_RANGE_UM
    } else {
        CLOSED_LOOP_RANGE_UM
    }
}

fn raw_to_microns(raw: i32, mode: ControlMode) -> f64 {
    let half_range = range_for_mode(mode) / 2.0;
    f64::from(raw) / f64::from(POSITION_SCALE) * half_range
}

fn microns_to_raw(microns: f64, mode: ControlMode) -> i32 {
    let half_range = range_for_mode(mode) / 2.0;
    let raw = (microns / half_range * f64::from(POSITION_SCALE)).round() as i32;
    raw.clamp(-POSITION_SCALE, POSITION_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory backend holding the last commanded state.
    #[derive(Default)]
    struct FakeChannel {
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        enabled: bool,
        raw: i32,
        mode: Option<ControlMode>,
    }

    #[async_trait]
    impl PiezoChannel for FakeChannel {
        async fn enable(&self) -> Result<()> {
            self.state.lock().unwrap().enabled = true;
            Ok(())
        }
        async fn disable(&self) -> Result<()> {
            self.state.lock().unwrap().enabled = false;
            Ok(())
        }
        async fn position_raw(&self) -> Result<i32> {
            Ok(self.state.lock().unwrap().raw)
        }
        async fn set_position_raw(&self, raw: i32) -> Result<()> {
            self.state.lock().unwrap().raw = raw;
            Ok(())
        }
        async fn control_mode(&self) -> Result<ControlMode> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .mode
                .unwrap_or(ControlMode::ClosedLoop))
        }
        async fn set_control_mode(&self, mode: ControlMode) -> Result<()> {
            self.state.lock().unwrap().mode = Some(mode);
            Ok(())
        }
    }

    #[test]
    fn control_mode_from_raw_maps_unknown_to_undefined() {
        assert_eq!(ControlMode::from_raw(2), ControlMode::ClosedLoop);
        assert_eq!(ControlMode::from_raw(3), ControlMode::OpenLoopSmooth);
        assert_eq!(ControlMode::from_raw(99), ControlMode::Undefined);
    }

    #[test]
    fn micron_conversion_spans_half_range() {
        // Full positive raw scale is +225 um in closed loop.
        assert!((raw_to_microns(POSITION_SCALE, ControlMode::ClosedLoop) - 225.0).abs() < 1e-9);
        assert!((raw_to_microns(-POSITION_SCALE, ControlMode::OpenLoop) + 300.0).abs() < 1e-9);
        assert_eq!(microns_to_raw(225.0, ControlMode::ClosedLoop), POSITION_SCALE);
        assert_eq!(microns_to_raw(0.0, ControlMode::ClosedLoop), 0);
    }

    #[test]
    fn out_of_travel_targets_clamp() {
        assert_eq!(microns_to_raw(1e6, ControlMode::ClosedLoop), POSITION_SCALE);
        assert_eq!(microns_to_raw(-1e6, ControlMode::OpenLoop), -POSITION_SCALE);
    }

    #[tokio::test]
    async fn travel_and_resolution_follow_mode() {
        let piezo = Pfm450::new(FakeChannel::default());
        piezo.set_control_mode(ControlMode::OpenLoop).await.unwrap();
        assert!((piezo.max_travel_um().await.unwrap() - 600.0).abs() < f64::EPSILON);
        assert!((piezo.resolution_um().await.unwrap() - 0.001).abs() < f64::EPSILON);

        piezo.set_control_mode(ControlMode::ClosedLoop).await.unwrap();
        assert!((piezo.max_travel_um().await.unwrap() - 450.0).abs() < f64::EPSILON);
        assert!((piezo.resolution_um().await.unwrap() - 0.003).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn micron_setpoint_round_trips() {
        let piezo = Pfm450::new(FakeChannel::default());
        piezo.set_position_um(112.5).await.unwrap();
        let pos = piezo.position_um().await.unwrap();
        assert!((pos - 112.5).abs() < 0.01);
    }
}
