//! Device configuration file.
//!
//! A TOML file with one optional table per instrument. Missing tables just
//! leave that panel disconnected until the user fills in an address.
//!
//! ```toml
//! [psu]
//! host = "192.168.1.40:5555"
//!
//! [rotator]
//! port = "/dev/ttyUSB0"
//! address = "0"
//!
//! [laser]
//! host = "192.168.1.41:5555"
//! max_diode_current = 0.101
//!
//! [relay]
//! host = "192.168.1.42:4196"
//! framing = "rtu_over_tcp"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use instr_driver_rigol::Dp832Config;
use instr_driver_thorlabs::{Cld1010Config, Ell14Config};
use instr_driver_waveshare::RelayConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevicesConfig {
    pub psu: Option<Dp832Config>,
    pub laser: Option<Cld1010Config>,
    pub rotator: Option<Ell14Config>,
    pub relay: Option<RelayConfig>,
}

impl DevicesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config() {
        let config: DevicesConfig = toml::from_str(
            r#"
            [psu]
            host = "10.0.0.5:5555"

            [rotator]
            port = "/dev/ttyUSB0"
            address = "2"
            "#,
        )
        .unwrap();
        assert_eq!(config.psu.unwrap().host, "10.0.0.5:5555");
        assert_eq!(config.rotator.unwrap().address, "2");
        assert!(config.laser.is_none());
        assert!(config.relay.is_none());
    }

    #[test]
    fn rejects_unknown_tables() {
        let result = toml::from_str::<DevicesConfig>("[oscilloscope]\nhost = \"x\"\n");
        assert!(result.is_err());
    }
}
