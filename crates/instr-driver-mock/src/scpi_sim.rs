//! Simulated SCPI power supply.
//!
//! Models a three-channel supply with the DP832's command surface: checked
//! writes (`*WAI`, `*ESR?`, `*STB?`, `:STAT:QUES?`), source setpoints and
//! measurements. Measurements approach their setpoint with first-order lag
//! plus a little seeded noise, so setter-with-confirmation loops see a
//! realistic ramp instead of an instant jump. Unknown commands latch ESR
//! bit 5, which a checked write then reports as a syntax error.

use instr_core::serial::DynSerial;
use rand_chacha::ChaCha8Rng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Tuning for the simulated supply.
#[derive(Debug, Clone)]
pub struct SimPowerSupplyConfig {
    /// Fraction of the remaining error closed per measurement query.
    pub settle_rate: f64,
    /// Half-width of the uniform measurement noise, in output units.
    pub noise: f64,
    /// RNG seed, so tests are reproducible.
    pub seed: u64,
}

impl Default for SimPowerSupplyConfig {
    fn default() -> Self {
        Self {
            settle_rate: 0.5,
            noise: 0.001,
            seed: 0x5EED,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct ChannelState {
    volt_set: f64,
    curr_set: f64,
    volt_meas: f64,
    curr_meas: f64,
    output: bool,
}

/// A running simulated power supply.
pub struct SimPowerSupply;

impl SimPowerSupply {
    /// Spawn the simulator, returning the transport a driver connects to.
    pub fn spawn(config: SimPowerSupplyConfig) -> DynSerial {
        let (sim_side, driver_side) = tokio::io::duplex(4096);
        tokio::spawn(run(sim_side, config));
        Box::new(driver_side)
    }
}

async fn run(port: tokio::io::DuplexStream, config: SimPowerSupplyConfig) {
    let mut reader = BufReader::new(port);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut channels = [ChannelState::default(); 3];
    let mut esr: u16 = 0;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        let reply = match handle(cmd, &mut channels, &mut esr, &mut rng, &config) {
            Some(reply) => reply,
            None => continue,
        };
        let framed = format!("{reply}\n");
        if reader.get_mut().write_all(framed.as_bytes()).await.is_err() {
            break;
        }
    }
    tracing::debug!("simulated power supply shut down");
}

fn handle(
    cmd: &str,
    channels: &mut [ChannelState; 3],
    esr: &mut u16,
    rng: &mut ChaCha8Rng,
    config: &SimPowerSupplyConfig,
) -> Option<String> {
    match cmd {
        "*IDN?" => return Some("SIMULATED,PSU3,0000001,1.00".to_string()),
        "*WAI" => return None,
        "*ESR?" => {
            // Reading the event register clears it.
            let val = *esr;
            *esr = 0;
            return Some(val.to_string());
        }
        "*STB?" | ":STAT:QUES?" => return Some("0".to_string()),
        _ => {}
    }
    if cmd.starts_with("*ESE") || cmd.starts_with("*SRE") {
        return None;
    }

    if let Some(rest) = cmd.strip_prefix(":OUTP:OVP").or_else(|| cmd.strip_prefix(":OUTP:OCP")) {
        return handle_protection(rest, channels.len(), esr);
    }

    if let Some(rest) = cmd.strip_prefix(":OUTP CH") {
        if let Some((ch, state)) = rest.split_once(',') {
            if let Some(chan) = parse_channel(ch, channels.len()) {
                channels[chan].output = matches!(state, "ON");
                return None;
            }
        }
        *esr |= 0x20;
        return None;
    }

    if let Some(rest) = cmd.strip_prefix(":SOUR") {
        return handle_source(rest, channels, esr);
    }

    if let Some(rest) = cmd.strip_prefix(":MEAS:") {
        return handle_measure(rest, channels, esr, rng, config);
    }

    // Anything else is outside the vocabulary.
    *esr |= 0x20;
    None
}

/// OVP/OCP limits are accepted but never trip; alarm queries always answer NO.
fn handle_protection(rest: &str, num_channels: usize, esr: &mut u16) -> Option<String> {
    let channel_ok = |args: &str| {
        args.strip_prefix("CH")
            .and_then(|s| s.split(',').next())
            .and_then(|ch| parse_channel(ch, num_channels))
            .is_some()
    };
    if let Some(args) = rest.strip_prefix(":ALAR? ") {
        if channel_ok(args) {
            return Some("NO".to_string());
        }
    } else if let Some(args) = rest
        .strip_prefix(":VAL ")
        .or_else(|| rest.strip_prefix(":CLEAR "))
        .or_else(|| rest.strip_prefix(" "))
    {
        if channel_ok(args) {
            return None;
        }
    }
    *esr |= 0x20;
    None
}

fn handle_source(rest: &str, channels: &mut [ChannelState; 3], esr: &mut u16) -> Option<String> {
    let (ch_str, tail) = rest.split_at(1);
    let Some(chan) = parse_channel(ch_str, channels.len()) else {
        *esr |= 0x10;
        return None;
    };
    match tail {
        ":VOLT?" => return Some(format!("{}", channels[chan].volt_set)),
        ":CURR?" => return Some(format!("{}", channels[chan].curr_set)),
        _ => {}
    }
    if let Some(val) = tail.strip_prefix(":VOLT ") {
        match val.parse::<f64>() {
            Ok(v) => channels[chan].volt_set = v,
            Err(_) => *esr |= 0x20,
        }
        return None;
    }
    if let Some(val) = tail.strip_prefix(":CURR ") {
        match val.parse::<f64>() {
            Ok(v) => channels[chan].curr_set = v,
            Err(_) => *esr |= 0x20,
        }
        return None;
    }
    *esr |= 0x20;
    None
}

fn handle_measure(
    rest: &str,
    channels: &mut [ChannelState; 3],
    esr: &mut u16,
    rng: &mut ChaCha8Rng,
    config: &SimPowerSupplyConfig,
) -> Option<String> {
    let (kind, ch_str) = rest.split_once("? CH")?;
    let Some(chan) = parse_channel(ch_str, channels.len()) else {
        *esr |= 0x10;
        return None;
    };
    let state = &mut channels[chan];

    // First-order lag toward the setpoint, advanced on every query.
    if state.output {
        state.volt_meas += (state.volt_set - state.volt_meas) * config.settle_rate;
        state.curr_meas += (state.curr_set - state.curr_meas) * config.settle_rate;
    } else {
        state.volt_meas *= 1.0 - config.settle_rate;
        state.curr_meas *= 1.0 - config.settle_rate;
    }

    let noise = |rng: &mut ChaCha8Rng| rng.gen_range(-config.noise..=config.noise);
    let reading = match kind {
        "VOLT" => state.volt_meas + noise(rng),
        "CURR" => state.curr_meas + noise(rng),
        "POWE" => state.volt_meas * state.curr_meas + noise(rng),
        _ => {
            *esr |= 0x20;
            return None;
        }
    };
    Some(format!("{reading:.6}"))
}

fn parse_channel(s: &str, count: usize) -> Option<usize> {
    let n: usize = s.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}
