//! Thorlabs instrument drivers.
//!
//! - [`cld1010::Cld1010`]: CLD1010LP laser diode controller (SCPI).
//! - [`pm100d::Pm100d`]: PM100D optical power meter (SCPI).
//! - [`elliptec`]: the Elliptec RS-485 bus protocol shared by the
//!   [`ell14::Ell14`] rotation mount and [`ella1::Ella1`] linear stage.
//! - [`pfm450::Pfm450`]: PFM450E precision piezo objective scanner, built
//!   over a pluggable [`pfm450::PiezoChannel`] backend.
//!
//! Elliptec devices are multidrop: several can hang off one serial adapter,
//! so their drivers take a shared port from [`shared_ports`].

pub mod cld1010;
pub mod ell14;
pub mod ella1;
pub mod elliptec;
pub mod pfm450;
pub mod pm100d;
pub mod shared_ports;

pub use cld1010::{Cld1010, Cld1010Config, Modulation};
pub use ell14::{Ell14, Ell14Config};
pub use ella1::Ella1;
pub use elliptec::{DeviceInfo, ElliptecDevice, ElliptecStatus, HomeDirection};
pub use pfm450::{ControlMode, Pfm450, PiezoChannel};
pub use pm100d::Pm100d;
