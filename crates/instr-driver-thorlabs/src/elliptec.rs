//! Thorlabs Elliptec bus protocol.
//!
//! RS-485 multidrop, 9600 baud, ASCII framed. Every message starts with a
//! single hex address character followed by a two-letter mnemonic; position
//! values travel as 8 hex digits encoding a signed 32-bit pulse count in
//! two's complement. Replies end with CR LF. While a move is in progress the
//! module may emit `GS` status lines before the real reply, so the
//! transaction loop skips those until the expected mnemonic arrives.
//!
//! Reference: ELLx modules protocol manual Issue 10.

use anyhow::{anyhow, Result};
use instr_core::serial::{drain_serial_buffer, SharedPortUnbuffered};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

/// Status codes reported in `GS` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElliptecStatus {
    Ok = 0x00,
    CommunicationTimeout = 0x01,
    MechanicalTimeout = 0x02,
    CommandError = 0x03,
    ValueOutOfRange = 0x04,
    ModuleIsolated = 0x05,
    ModuleOutOfIsolation = 0x06,
    InitializationError = 0x07,
    ThermalError = 0x08,
    Busy = 0x09,
    SensorError = 0x0A,
    MotorError = 0x0B,
    OutOfRange = 0x0C,
    OverCurrentError = 0x0D,
    Unknown = 0xFF,
}

impl ElliptecStatus {
    pub fn from_hex(hex: &str) -> Self {
        match u8::from_str_radix(hex, 16) {
            Ok(code) => Self::from_u8(code),
            Err(_) => Self::Unknown,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::CommunicationTimeout,
            0x02 => Self::MechanicalTimeout,
            0x03 => Self::CommandError,
            0x04 => Self::ValueOutOfRange,
            0x05 => Self::ModuleIsolated,
            0x06 => Self::ModuleOutOfIsolation,
            0x07 => Self::InitializationError,
            0x08 => Self::ThermalError,
            0x09 => Self::Busy,
            0x0A => Self::SensorError,
            0x0B => Self::MotorError,
            0x0C => Self::OutOfRange,
            0x0D => Self::OverCurrentError,
            _ => Self::Unknown,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Ok => "No error",
            Self::CommunicationTimeout => "Communication timeout",
            Self::MechanicalTimeout => "Mechanical timeout",
            Self::CommandError => "Command error",
            Self::ValueOutOfRange => "Value out of range",
            Self::ModuleIsolated => "Module isolated",
            Self::ModuleOutOfIsolation => "Module out of isolation",
            Self::InitializationError => "Initialization error",
            Self::ThermalError => "Thermal error",
            Self::Busy => "Busy",
            Self::SensorError => "Sensor error",
            Self::MotorError => "Motor error",
            Self::OutOfRange => "Position out of range",
            Self::OverCurrentError => "Over current error",
            Self::Unknown => "Unknown error",
        }
    }
}

/// Homing direction for rotary modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeDirection {
    Clockwise,
    CounterClockwise,
}

impl HomeDirection {
    fn digit(self) -> char {
        match self {
            Self::Clockwise => '0',
            Self::CounterClockwise => '1',
        }
    }
}

/// Fields of the `IN` device information reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Two-character model code ("0E" for an ELL14).
    pub model: String,
    pub serial: String,
    pub year: String,
    pub firmware: String,
    pub hardware: String,
    /// Travel in the module's native unit (mm or deg), from 4 hex digits.
    pub travel: u32,
    /// Pulses per travel unit, from 8 hex digits.
    pub pulses_per_unit: u32,
}

/// Encode a signed pulse count as the bus's 8-digit hex field.
pub fn pulses_to_hex(pulses: i32) -> String {
    format!("{:08X}", pulses as u32)
}

/// Decode the bus's 8-digit hex field into a signed pulse count.
pub fn hex_to_pulses(hex: &str) -> Result<i32> {
    u32::from_str_radix(hex.trim(), 16)
        .map(|v| v as i32)
        .map_err(|_| anyhow!("invalid pulse field '{hex}'"))
}

/// One module on the Elliptec bus, identified by its address character.
#[derive(Clone)]
pub struct ElliptecDevice {
    port: SharedPortUnbuffered,
    address: String,
    reply_timeout: Duration,
}

impl ElliptecDevice {
    pub fn new(port: SharedPortUnbuffered, address: &str) -> Self {
        Self {
            port,
            address: address.to_string(),
            reply_timeout: Duration::from_secs(2),
        }
    }

    /// Override the reply timeout (default 2 s; long moves may need more).
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a command and wait for the reply line carrying `expected`.
    ///
    /// Stale bytes are drained first so the reply lines up with the request.
    /// `GS` lines that arrive before the expected mnemonic are treated as
    /// progress reports: OK and Busy are skipped, anything else is raised as
    /// an error.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn transaction(&self, cmd: &str, expected: &str) -> Result<String> {
        let full_cmd = format!("{}{}", self.address, cmd);
        let reply_prefix = format!("{}{}", self.address, expected);
        let status_prefix = format!("{}GS", self.address);

        let mut guard = self.port.lock().await;
        let discarded = drain_serial_buffer(&mut *guard, 10).await;
        if discarded > 0 {
            tracing::trace!(discarded, "Cleared stale bytes before Elliptec command");
        }

        guard.write_all(full_cmd.as_bytes()).await?;
        guard.flush().await?;

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        loop {
            let line = read_bus_line(&mut *guard, deadline).await?;
            tracing::debug!(cmd = %full_cmd, line = %line, "Elliptec reply line");

            if let Some(payload) = line.strip_prefix(&reply_prefix) {
                return Ok(payload.to_string());
            }
            if let Some(code) = line.strip_prefix(&status_prefix) {
                let status = ElliptecStatus::from_hex(code.get(..2).unwrap_or(""));
                match status {
                    ElliptecStatus::Ok | ElliptecStatus::Busy => continue,
                    other => {
                        return Err(anyhow!(
                            "Elliptec device {} reported: {}",
                            self.address,
                            other.description()
                        ))
                    }
                }
            }
            tracing::trace!(line = %line, "Ignoring reply for another bus address");
        }
    }

    /// Send a command without waiting for a reply.
    async fn write_only(&self, cmd: &str) -> Result<()> {
        let full_cmd = format!("{}{}", self.address, cmd);
        let mut guard = self.port.lock().await;
        drain_serial_buffer(&mut *guard, 10).await;
        guard.write_all(full_cmd.as_bytes()).await?;
        guard.flush().await?;
        Ok(())
    }

    /// Current position in pulses (`gp`).
    pub async fn position_pulses(&self) -> Result<i32> {
        let reply = self.transaction("gp", "PO").await?;
        hex_to_pulses(&reply)
    }

    /// Home the module (`ho0`/`ho1`), returning the position reached.
    pub async fn home(&self, direction: HomeDirection) -> Result<i32> {
        let reply = self
            .transaction(&format!("ho{}", direction.digit()), "PO")
            .await?;
        hex_to_pulses(&reply)
    }

    /// Home offset in pulses (`go`).
    pub async fn home_offset_pulses(&self) -> Result<i32> {
        let reply = self.transaction("go", "HO").await?;
        hex_to_pulses(&reply)
    }

    /// Absolute move (`ma`), returning the position reached.
    pub async fn move_absolute_pulses(&self, pulses: i32) -> Result<i32> {
        let reply = self
            .transaction(&format!("ma{}", pulses_to_hex(pulses)), "PO")
            .await?;
        hex_to_pulses(&reply)
    }

    /// Relative move (`mr`), returning the position reached.
    pub async fn move_relative_pulses(&self, pulses: i32) -> Result<i32> {
        let reply = self
            .transaction(&format!("mr{}", pulses_to_hex(pulses)), "PO")
            .await?;
        hex_to_pulses(&reply)
    }

    /// Jog one step forward (`fw`), returning the position reached.
    pub async fn jog_forward(&self) -> Result<i32> {
        let reply = self.transaction("fw", "PO").await?;
        hex_to_pulses(&reply)
    }

    /// Jog one step backward (`bw`), returning the position reached.
    pub async fn jog_backward(&self) -> Result<i32> {
        let reply = self.transaction("bw", "PO").await?;
        hex_to_pulses(&reply)
    }

    /// Jog step size in pulses (`gj`).
    pub async fn jog_step_pulses(&self) -> Result<i32> {
        let reply = self.transaction("gj", "GJ").await?;
        hex_to_pulses(&reply)
    }

    /// Set the jog step size (`sj`).
    pub async fn set_jog_step_pulses(&self, pulses: i32) -> Result<i32> {
        let reply = self
            .transaction(&format!("sj{}", pulses_to_hex(pulses)), "GJ")
            .await?;
        hex_to_pulses(&reply)
    }

    /// Stop any motion (`st`).
    pub async fn stop(&self) -> Result<()> {
        self.transaction("st", "GS").await.map(|_| ())
    }

    /// Query the module status (`gs`).
    pub async fn status(&self) -> Result<ElliptecStatus> {
        let full_cmd = format!("{}gs", self.address);
        let reply_prefix = format!("{}GS", self.address);

        let mut guard = self.port.lock().await;
        drain_serial_buffer(&mut *guard, 10).await;
        guard.write_all(full_cmd.as_bytes()).await?;
        guard.flush().await?;

        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        let line = read_bus_line(&mut *guard, deadline).await?;
        if let Some(code) = line.strip_prefix(&reply_prefix) {
            Ok(ElliptecStatus::from_hex(code.get(..2).unwrap_or("")))
        } else {
            Ok(ElliptecStatus::Unknown)
        }
    }

    /// Persist the current address and settings across power cycles (`us`).
    ///
    /// Modules revert to their default address at power-on unless user data
    /// has been saved after changing it.
    pub async fn save_user_data(&self) -> Result<()> {
        self.write_only("us").await
    }

    /// Change the module's bus address (`ca`). Takes effect immediately;
    /// call [`save_user_data`](Self::save_user_data) to persist it.
    pub async fn change_address(&mut self, new_address: char) -> Result<()> {
        if !new_address.is_ascii_hexdigit() {
            return Err(anyhow!("Elliptec address must be a hex digit, got '{new_address}'"));
        }
        self.write_only(&format!("ca{new_address}")).await?;
        self.address = new_address.to_string();
        Ok(())
    }

    /// Query the module identity and calibration (`in`).
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let reply = self.transaction("in", "IN").await?;
        parse_device_info(&reply)
    }

    /// Poll the status until the module reports OK three times in a row.
    ///
    /// Modules answer slowly (or not at all) mid-move, so a single OK is not
    /// proof the move finished.
    pub async fn wait_settled(&self, timeout: Duration) -> Result<()> {
        let start = tokio::time::Instant::now();
        let mut consecutive_ok = 0;

        loop {
            if start.elapsed() > timeout {
                tracing::warn!(
                    address = %self.address,
                    consecutive_ok,
                    "Elliptec wait_settled timed out"
                );
                return Err(anyhow!(
                    "Elliptec device {} did not settle within {:?}",
                    self.address,
                    timeout
                ));
            }

            match self.status().await {
                Ok(status) if status.is_ok() => {
                    consecutive_ok += 1;
                    if consecutive_ok >= 3 {
                        return Ok(());
                    }
                }
                Ok(status) => {
                    tracing::debug!(address = %self.address, ?status, "status not OK, resetting counter");
                    consecutive_ok = 0;
                }
                Err(e) => {
                    tracing::debug!(address = %self.address, error = %e, "status query failed mid-move");
                    consecutive_ok = 0;
                }
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Accumulate bytes until CR or LF, within `deadline`.
async fn read_bus_line<R: AsyncReadExt + Unpin + ?Sized>(
    port: &mut R,
    deadline: tokio::time::Instant,
) -> Result<String> {
    let mut line: Vec<u8> = Vec::with_capacity(32);
    let mut buf = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(anyhow!(
                "Elliptec reply timed out (partial: '{}')",
                String::from_utf8_lossy(&line)
            ));
        }
        match tokio::time::timeout(remaining, port.read(&mut buf)).await {
            Ok(Ok(0)) => return Err(anyhow!("Elliptec port closed")),
            Ok(Ok(_)) => {
                if buf[0] == b'\r' || buf[0] == b'\n' {
                    if !line.is_empty() {
                        return Ok(String::from_utf8_lossy(&line).to_string());
                    }
                    // Skip empty fragments between CR and LF.
                } else {
                    line.push(buf[0]);
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(anyhow!(
                    "Elliptec reply timed out (partial: '{}')",
                    String::from_utf8_lossy(&line)
                ))
            }
        }
    }
}

fn parse_device_info(data: &str) -> Result<DeviceInfo> {
    // Layout after the IN mnemonic: model(2) serial(8) year(4) fw(2) hw(2)
    // travel(4 hex) pulses_per_unit(8 hex), 30 chars total.
    let data = data.trim();
    // Line noise can leave multi-byte replacement chars in the decoded
    // string, so the fixed byte offsets below are only safe on ASCII.
    if !data.is_ascii() {
        return Err(anyhow!("non-ASCII IN reply: '{data}'"));
    }
    if data.len() < 30 {
        return Err(anyhow!("IN reply too short ({} chars): '{data}'", data.len()));
    }
    let travel = u32::from_str_radix(&data[18..22], 16)
        .map_err(|_| anyhow!("invalid travel field in IN reply '{data}'"))?;
    let pulses_per_unit = u32::from_str_radix(&data[22..30], 16)
        .map_err(|_| anyhow!("invalid pulses field in IN reply '{data}'"))?;
    Ok(DeviceInfo {
        model: data[0..2].to_string(),
        serial: data[2..10].to_string(),
        year: data[10..14].to_string(),
        firmware: data[14..16].to_string(),
        hardware: data[16..18].to_string(),
        travel,
        pulses_per_unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use instr_core::serial::wrap_shared_unbuffered;
    use tokio::io::AsyncWriteExt;

    fn device_on_duplex() -> (tokio::io::DuplexStream, ElliptecDevice) {
        let (host, port) = tokio::io::duplex(256);
        let dev = ElliptecDevice::new(wrap_shared_unbuffered(Box::new(port)), "2")
            .with_reply_timeout(Duration::from_millis(200));
        (host, dev)
    }

    #[test]
    fn pulse_hex_codec_is_signed() {
        assert_eq!(pulses_to_hex(143360), "00023000");
        assert_eq!(pulses_to_hex(-17920), "FFFFBA00");
        assert_eq!(hex_to_pulses("00023000").unwrap(), 143360);
        assert_eq!(hex_to_pulses("FFFFBA00").unwrap(), -17920);
        assert!(hex_to_pulses("zzzz").is_err());
    }

    #[test]
    fn status_codes_decode() {
        assert!(ElliptecStatus::from_hex("00").is_ok());
        assert_eq!(ElliptecStatus::from_hex("02"), ElliptecStatus::MechanicalTimeout);
        assert_eq!(ElliptecStatus::from_hex("09"), ElliptecStatus::Busy);
        assert_eq!(ElliptecStatus::from_hex("FF"), ElliptecStatus::Unknown);
    }

    #[test]
    fn device_info_parses_fixed_layout() {
        // ELL14: travel 0x0168 = 360 deg, 0x00023000 = 143360 pulses/rev
        let info = parse_device_info("0E1140051720231701016800023000").unwrap();
        assert_eq!(info.model, "0E");
        assert_eq!(info.serial, "11400517");
        assert_eq!(info.travel, 360);
        assert_eq!(info.pulses_per_unit, 143360);
    }

    #[test]
    fn device_info_rejects_non_ascii_garbage() {
        // Long enough to pass the length gate, but the replacement chars
        // land mid-field and must come back as an error, not a panic.
        let garbled = "0E11405\u{fffd}\u{fffd}\u{fffd}\u{fffd}1720231701016800023000";
        assert!(parse_device_info(garbled).is_err());
    }

    #[tokio::test]
    async fn transaction_skips_busy_status_lines() {
        let (mut host, dev) = device_on_duplex();

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"2gp");
            // Two busy reports before the real reply.
            host.write_all(b"2GS09\r\n2GS09\r\n2PO00011800\r\n")
                .await
                .unwrap();
        });

        let pulses = dev.position_pulses().await.unwrap();
        assert_eq!(pulses, 0x11800);
    }

    #[tokio::test]
    async fn transaction_raises_on_error_status() {
        let (mut host, dev) = device_on_duplex();

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let _ = host.read(&mut buf).await.unwrap();
            host.write_all(b"2GS02\r\n").await.unwrap();
        });

        let err = dev.position_pulses().await.unwrap_err();
        assert!(err.to_string().contains("Mechanical timeout"));
    }

    #[tokio::test]
    async fn move_absolute_encodes_negative_pulses() {
        let (mut host, dev) = device_on_duplex();

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"2maFFFFBA00");
            host.write_all(b"2POFFFFBA00\r\n").await.unwrap();
        });

        let reached = dev.move_absolute_pulses(-17920).await.unwrap();
        assert_eq!(reached, -17920);
    }

    #[tokio::test]
    async fn stop_acknowledges_on_status_reply() {
        let (mut host, dev) = device_on_duplex();

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"2st");
            host.write_all(b"2GS00\r\n").await.unwrap();
        });

        dev.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_errors_when_bus_is_silent() {
        // Keep the peer alive so the port stays open but never answers.
        let (_host, dev) = device_on_duplex();

        let err = dev.stop().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn replies_for_other_addresses_are_ignored() {
        let (mut host, dev) = device_on_duplex();

        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            let _ = host.read(&mut buf).await.unwrap();
            // A sibling device's reply arrives first on the shared bus.
            host.write_all(b"3PO00000100\r\n2PO00000200\r\n")
                .await
                .unwrap();
        });

        let pulses = dev.position_pulses().await.unwrap();
        assert_eq!(pulses, 0x200);
    }
}
