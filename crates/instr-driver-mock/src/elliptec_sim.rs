//! Simulated Elliptec bus module.
//!
//! Answers the `gp`/`ma`/`mr`/`ho`/`fw`/`bw`/`gj`/`sj`/`gs`/`in` mnemonics
//! for one address. Move commands emit a configurable number of `GS09`
//! (busy) lines before the final `PO` reply, matching how a real module
//! behaves while the motor runs.

use instr_core::serial::DynSerial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Settings for a simulated module.
#[derive(Debug, Clone)]
pub struct SimElliptecConfig {
    /// Bus address character.
    pub address: char,
    /// Busy status lines emitted before each move reply.
    pub busy_replies: usize,
    /// Pulses per unit reported in the `IN` reply (ELL14 default).
    pub pulses_per_unit: u32,
    /// Travel reported in the `IN` reply.
    pub travel: u32,
}

impl Default for SimElliptecConfig {
    fn default() -> Self {
        Self {
            address: '0',
            busy_replies: 2,
            pulses_per_unit: 143_360,
            travel: 360,
        }
    }
}

/// A running simulated Elliptec module.
pub struct SimElliptec;

impl SimElliptec {
    /// Spawn the simulator, returning the transport a driver connects to.
    pub fn spawn(config: SimElliptecConfig) -> DynSerial {
        let (sim_side, driver_side) = tokio::io::duplex(1024);
        tokio::spawn(run(sim_side, config));
        Box::new(driver_side)
    }
}

struct ModuleState {
    position: i32,
    jog_step: i32,
    home_offset: i32,
}

async fn run(mut port: tokio::io::DuplexStream, config: SimElliptecConfig) {
    let mut state = ModuleState {
        position: 0,
        jog_step: 4096,
        home_offset: 0,
    };
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let Ok(n) = port.read(&mut buf).await else { break };
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        while let Some((cmd, rest)) = take_command(&pending, config.address) {
            pending = rest;
            let Some(reply) = respond(&cmd, &mut state, &config) else {
                continue;
            };
            if port.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
    tracing::debug!(address = %config.address, "simulated Elliptec module shut down");
}

/// Pop one complete command addressed to us off the front of the buffer.
///
/// Commands are not line-terminated; their length is fixed by the mnemonic
/// (2 chars, plus 8 hex digits for `ma`/`mr`/`sj`, 1 digit for `ho`/`ca`).
fn take_command(pending: &[u8], address: char) -> Option<(String, Vec<u8>)> {
    if pending.len() < 3 {
        return None;
    }
    let text = String::from_utf8_lossy(pending);
    if !text.starts_with(address) {
        // Traffic for another module; drop one byte and resync.
        return Some((String::new(), pending[1..].to_vec()));
    }
    let mnemonic = &text[1..3];
    let arg_len = match mnemonic {
        "ma" | "mr" | "sj" => 8,
        "ho" | "ca" => 1,
        _ => 0,
    };
    let total = 3 + arg_len;
    if pending.len() < total {
        return None;
    }
    Some((text[1..total].to_string(), pending[total..].to_vec()))
}

fn respond(cmd: &str, state: &mut ModuleState, config: &SimElliptecConfig) -> Option<String> {
    if cmd.is_empty() {
        return None;
    }
    let addr = config.address;
    let (mnemonic, arg) = cmd.split_at(2.min(cmd.len()));

    let position_reply = |pos: i32, busy: usize| {
        let mut reply = String::new();
        for _ in 0..busy {
            reply.push_str(&format!("{addr}GS09\r\n"));
        }
        reply.push_str(&format!("{addr}PO{:08X}\r\n", pos as u32));
        reply
    };

    match mnemonic {
        "gp" => Some(position_reply(state.position, 0)),
        "gs" | "st" => Some(format!("{addr}GS00\r\n")),
        "go" => Some(format!("{addr}HO{:08X}\r\n", state.home_offset as u32)),
        "gj" => Some(format!("{addr}GJ{:08X}\r\n", state.jog_step as u32)),
        "ma" => {
            state.position = u32::from_str_radix(arg, 16).ok()? as i32;
            Some(position_reply(state.position, config.busy_replies))
        }
        "mr" => {
            let delta = u32::from_str_radix(arg, 16).ok()? as i32;
            state.position = state.position.wrapping_add(delta);
            Some(position_reply(state.position, config.busy_replies))
        }
        "ho" => {
            state.position = 0;
            Some(position_reply(0, config.busy_replies))
        }
        "fw" => {
            state.position = state.position.wrapping_add(state.jog_step);
            Some(position_reply(state.position, config.busy_replies))
        }
        "bw" => {
            state.position = state.position.wrapping_sub(state.jog_step);
            Some(position_reply(state.position, config.busy_replies))
        }
        "sj" => {
            state.jog_step = u32::from_str_radix(arg, 16).ok()? as i32;
            Some(format!("{addr}GJ{:08X}\r\n", state.jog_step as u32))
        }
        "in" => Some(format!(
            "{addr}IN0E1140051720231701{:04X}{:08X}\r\n",
            config.travel, config.pulses_per_unit
        )),
        // `us` and `ca` are fire-and-forget.
        "us" | "ca" => None,
        _ => Some(format!("{addr}GS03\r\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_reply(port: &mut DynSerial) -> String {
        let mut buf = [0u8; 256];
        let n = port.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn position_query_reports_state() {
        let mut port = SimElliptec::spawn(SimElliptecConfig {
            address: '2',
            ..SimElliptecConfig::default()
        });
        port.write_all(b"2gp").await.unwrap();
        assert_eq!(read_reply(&mut port).await, "2PO00000000\r\n");
    }

    #[tokio::test]
    async fn move_emits_busy_lines_then_position() {
        let mut port = SimElliptec::spawn(SimElliptecConfig {
            address: '2',
            busy_replies: 2,
            ..SimElliptecConfig::default()
        });
        port.write_all(b"2ma00004600").await.unwrap();
        let reply = read_reply(&mut port).await;
        assert_eq!(reply, "2GS09\r\n2GS09\r\n2PO00004600\r\n");
    }

    #[tokio::test]
    async fn relative_moves_accumulate_signed() {
        let mut port = SimElliptec::spawn(SimElliptecConfig {
            address: '0',
            busy_replies: 0,
            ..SimElliptecConfig::default()
        });
        port.write_all(b"0mr00001000").await.unwrap();
        assert_eq!(read_reply(&mut port).await, "0PO00001000\r\n");
        // -0x2000 pulses in two's complement.
        port.write_all(b"0mrFFFFE000").await.unwrap();
        assert_eq!(read_reply(&mut port).await, "0POFFFFF000\r\n");
    }

    #[tokio::test]
    async fn in_reply_carries_calibration() {
        let mut port = SimElliptec::spawn(SimElliptecConfig::default());
        port.write_all(b"0in").await.unwrap();
        let reply = read_reply(&mut port).await;
        assert!(reply.starts_with("0IN0E"));
        assert!(reply.contains("016800023000"));
    }
}
