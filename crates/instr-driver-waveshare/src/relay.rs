//! 8-channel relay control over Modbus.
//!
//! Coils 0..=7 map to the relay channels. Write Single Coil (0x05) switches
//! one channel (0xFF00 on, 0x0000 off) and the board echoes the request
//! back, which doubles as the acknowledgement. Read Coils (0x01) returns
//! all eight states packed into one byte, bit 0 = channel 0.

use crate::crc::{append_crc, check_crc};
use anyhow::{anyhow, Result};
use instr_core::error::InstrumentError;
use instr_core::serial::DynSerial;
use serde::Deserialize;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Number of relay channels on the board.
pub const NUM_CHANNELS: u8 = 8;

/// How frames are carried over the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Raw RTU frames with CRC through the transparent socket (port 4196).
    RtuOverTcp,
    /// Standard Modbus TCP with MBAP headers (port 502).
    ModbusTcp,
}

fn default_framing() -> Framing {
    Framing::RtuOverTcp
}
fn default_unit() -> u8 {
    0x01
}

/// Connection settings for the relay board.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// `host:port`. The board listens on 4196 (transparent) or 502 (Modbus TCP).
    pub host: String,
    #[serde(default = "default_framing")]
    pub framing: Framing,
    /// Modbus unit (device) address.
    #[serde(default = "default_unit")]
    pub unit: u8,
}

/// Waveshare Modbus POE ETH relay.
pub struct Relay {
    transport: Mutex<DynSerial>,
    framing: Framing,
    unit: u8,
    transaction_id: AtomicU16,
    timeout: Duration,
}

impl Relay {
    /// Connect to the board over TCP.
    pub async fn open(config: &RelayConfig) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(&config.host)
            .await
            .map_err(|e| InstrumentError::Connection {
                device: "relay".to_string(),
                detail: format!("{}: {e}", config.host),
            })?;
        stream.set_nodelay(true)?;
        tracing::info!(host = %config.host, framing = ?config.framing, "Connected to relay board");
        Ok(Self::from_transport(
            Box::new(stream),
            config.framing,
            config.unit,
        ))
    }

    /// Wrap an already-open transport. Used by tests and simulators.
    pub fn from_transport(transport: DynSerial, framing: Framing, unit: u8) -> Self {
        Self {
            transport: Mutex::new(transport),
            framing,
            unit,
            transaction_id: AtomicU16::new(1),
            timeout: Duration::from_secs(1),
        }
    }

    fn check_channel(channel: u8) -> Result<()> {
        if channel < NUM_CHANNELS {
            Ok(())
        } else {
            Err(InstrumentError::ChannelOutOfRange {
                channel,
                max: NUM_CHANNELS - 1,
            }
            .into())
        }
    }

    /// Switch one relay channel.
    pub async fn set(&self, channel: u8, on: bool) -> Result<()> {
        Self::check_channel(channel)?;
        let pdu = write_coil_pdu(channel, on);
        match self.framing {
            Framing::RtuOverTcp => {
                let frame = rtu_frame(self.unit, &pdu);
                let reply = self.transact(&frame, frame.len()).await?;
                // The board acknowledges by echoing the request.
                if reply != frame {
                    return Err(anyhow!(
                        "relay did not echo write for channel {channel}: {reply:02X?}"
                    ));
                }
            }
            Framing::ModbusTcp => {
                let tid = self.transaction_id.fetch_add(1, Ordering::Relaxed);
                let frame = mbap_frame(tid, self.unit, &pdu);
                let reply = self.transact(&frame, frame.len()).await?;
                check_mbap_reply(&reply, tid, self.unit, 0x05)?;
            }
        }
        tracing::debug!(channel, on, "relay switched");
        Ok(())
    }

    pub async fn on(&self, channel: u8) -> Result<()> {
        self.set(channel, true).await
    }

    pub async fn off(&self, channel: u8) -> Result<()> {
        self.set(channel, false).await
    }

    /// Switch every channel on, one coil at a time.
    pub async fn all_on(&self) -> Result<()> {
        for ch in 0..NUM_CHANNELS {
            self.set(ch, true).await?;
        }
        Ok(())
    }

    /// Switch every channel off, one coil at a time.
    pub async fn all_off(&self) -> Result<()> {
        for ch in 0..NUM_CHANNELS {
            self.set(ch, false).await?;
        }
        Ok(())
    }

    /// Read all eight channel states.
    pub async fn read_all(&self) -> Result<[bool; NUM_CHANNELS as usize]> {
        let pdu = read_coils_pdu();
        let bits = match self.framing {
            Framing::RtuOverTcp => {
                let frame = rtu_frame(self.unit, &pdu);
                // unit + fn + count + data byte + crc(2)
                let reply = self.transact(&frame, 6).await?;
                coil_bits_from_rtu(&reply, self.unit)?
            }
            Framing::ModbusTcp => {
                let tid = self.transaction_id.fetch_add(1, Ordering::Relaxed);
                let frame = mbap_frame(tid, self.unit, &pdu);
                // mbap(7) + fn + count + data byte
                let reply = self.transact(&frame, 10).await?;
                check_mbap_reply(&reply, tid, self.unit, 0x01)?;
                reply[9]
            }
        };
        let mut states = [false; NUM_CHANNELS as usize];
        for (ch, state) in states.iter_mut().enumerate() {
            *state = bits & (1 << ch) != 0;
        }
        Ok(states)
    }

    /// Read one channel state.
    pub async fn read(&self, channel: u8) -> Result<bool> {
        Self::check_channel(channel)?;
        let states = self.read_all().await?;
        Ok(states[channel as usize])
    }

    async fn transact(&self, frame: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        let mut guard = self.transport.lock().await;
        guard.write_all(frame).await?;
        guard.flush().await?;

        let mut reply = vec![0u8; reply_len];
        tokio::time::timeout(self.timeout, guard.read_exact(&mut reply))
            .await
            .map_err(|_| anyhow!("relay reply timed out"))??;
        Ok(reply)
    }
}

/// Write Single Coil PDU: coil address is the channel number.
fn write_coil_pdu(channel: u8, on: bool) -> [u8; 5] {
    let value = if on { 0xFF } else { 0x00 };
    [0x05, 0x00, channel, value, 0x00]
}

/// Read Coils PDU for all eight channels starting at coil 0.
fn read_coils_pdu() -> [u8; 5] {
    [0x01, 0x00, 0x00, 0x00, 0x08]
}

/// RTU frame: unit + PDU + CRC.
fn rtu_frame(unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(unit);
    frame.extend_from_slice(pdu);
    append_crc(&mut frame);
    frame
}

/// Modbus TCP frame: MBAP header (transaction id, protocol 0, length) + unit + PDU.
fn mbap_frame(transaction_id: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let len = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(pdu.len() + 7);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.push(unit);
    frame.extend_from_slice(pdu);
    frame
}

/// Extract the coil bit byte from an RTU Read Coils reply.
fn coil_bits_from_rtu(reply: &[u8], unit: u8) -> Result<u8> {
    if reply.len() != 6 || reply[0] != unit || reply[1] != 0x01 || reply[2] != 0x01 {
        return Err(anyhow!("malformed read coils reply: {reply:02X?}"));
    }
    if !check_crc(reply) {
        return Err(anyhow!("read coils reply failed CRC check: {reply:02X?}"));
    }
    Ok(reply[3])
}

/// Validate an MBAP reply header and check for a Modbus exception.
fn check_mbap_reply(reply: &[u8], transaction_id: u16, unit: u8, function: u8) -> Result<()> {
    if reply.len() < 9 {
        return Err(anyhow!("short Modbus TCP reply: {reply:02X?}"));
    }
    let tid = u16::from_be_bytes([reply[0], reply[1]]);
    if tid != transaction_id || reply[6] != unit {
        return Err(anyhow!("Modbus TCP reply header mismatch: {reply:02X?}"));
    }
    if reply[7] == (function | 0x80) {
        return Err(anyhow!("Modbus exception {:#04X}", reply[8]));
    }
    if reply[7] != function {
        return Err(anyhow!("unexpected function {:#04X} in reply", reply[7]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Peer that echoes write-coil frames and serves a fixed coil byte.
    fn spawn_rtu_peer(mut host: tokio::io::DuplexStream, coil_bits: u8) {
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            loop {
                let Ok(n) = host.read(&mut buf).await else { break };
                if n == 0 {
                    break;
                }
                let frame = &buf[..n];
                match frame.get(1) {
                    Some(0x05) => {
                        // Echo acknowledgement.
                        host.write_all(frame).await.unwrap();
                    }
                    Some(0x01) => {
                        let mut reply = vec![frame[0], 0x01, 0x01, coil_bits];
                        append_crc(&mut reply);
                        host.write_all(&reply).await.unwrap();
                    }
                    _ => {}
                }
            }
        });
    }

    #[test]
    fn write_coil_frame_matches_vendor_sample() {
        let frame = rtu_frame(0x01, &write_coil_pdu(3, true));
        assert_eq!(&frame[..6], &[0x01, 0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert!(check_crc(&frame));

        let off = rtu_frame(0x01, &write_coil_pdu(3, false));
        assert_eq!(&off[..6], &[0x01, 0x05, 0x00, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn read_coils_frame_matches_vendor_sample() {
        let frame = rtu_frame(0x01, &read_coils_pdu());
        assert_eq!(frame, vec![0x01, 0x01, 0x00, 0x00, 0x00, 0x08, 0x3D, 0xCC]);
    }

    #[test]
    fn mbap_frame_wraps_pdu() {
        let frame = mbap_frame(7, 0x01, &write_coil_pdu(0, true));
        assert_eq!(
            frame,
            vec![0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x00, 0xFF, 0x00]
        );
    }

    #[test]
    fn mbap_reply_exception_is_raised() {
        let reply = [0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x02];
        let err = check_mbap_reply(&reply, 7, 0x01, 0x05).unwrap_err();
        assert!(err.to_string().contains("exception"));
    }

    #[tokio::test]
    async fn set_verifies_echo() {
        let (host, device) = tokio::io::duplex(64);
        spawn_rtu_peer(host, 0);
        let relay = Relay::from_transport(Box::new(device), Framing::RtuOverTcp, 0x01);
        relay.set(5, true).await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_echo_is_an_error() {
        let (mut host, device) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = host.read(&mut buf).await.unwrap();
            let mut corrupted = buf[..n].to_vec();
            corrupted[3] ^= 1;
            host.write_all(&corrupted).await.unwrap();
        });
        let relay = Relay::from_transport(Box::new(device), Framing::RtuOverTcp, 0x01);
        let err = relay.set(0, true).await.unwrap_err();
        assert!(err.to_string().contains("echo"));
    }

    #[tokio::test]
    async fn read_unpacks_coil_bits() {
        let (host, device) = tokio::io::duplex(64);
        // Channels 1 and 7 energized.
        spawn_rtu_peer(host, 0b1000_0010);
        let relay = Relay::from_transport(Box::new(device), Framing::RtuOverTcp, 0x01);

        assert!(relay.read(1).await.unwrap());
        assert!(relay.read(7).await.unwrap());
        assert!(!relay.read(0).await.unwrap());

        let states = relay.read_all().await.unwrap();
        assert_eq!(states.iter().filter(|s| **s).count(), 2);
    }

    #[tokio::test]
    async fn channel_bounds_are_enforced() {
        let (_host, device) = tokio::io::duplex(64);
        let relay = Relay::from_transport(Box::new(device), Framing::RtuOverTcp, 0x01);
        assert!(relay.set(8, true).await.is_err());
        assert!(relay.read(9).await.is_err());
    }
}
