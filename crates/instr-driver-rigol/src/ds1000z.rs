//! Rigol DS1000Z series oscilloscope.
//!
//! Channel, trigger and timebase settings are exposed through borrowed
//! handles (`scope.channel(1)?`, `scope.trigger()`, `scope.timebase()`).
//! Waveforms download in BYTE format as IEEE-488.2 definite-length blocks,
//! at most 250000 points per transfer, and are scaled to volts using the
//! waveform preamble.

use anyhow::{anyhow, bail, Result};
use instr_core::error::InstrumentError;
use instr_core::scpi::ScpiConnection;
use instr_core::serial::DynSerial;
use std::str::FromStr;
use std::time::Duration;

/// Max points per `:WAV:DATA?` transfer.
const MAX_BLOCK_POINTS: usize = 250_000;

/// Acquisition mode (`:ACQ:TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Normal,
    Averages,
    Peak,
    HighResolution,
}

impl AcquireMode {
    fn command(self) -> &'static str {
        match self {
            Self::Normal => "NORM",
            Self::Averages => "AVER",
            Self::Peak => "PEAK",
            Self::HighResolution => "HRES",
        }
    }

    fn from_reply(reply: &str) -> Result<Self> {
        match reply {
            "NORM" => Ok(Self::Normal),
            "AVER" => Ok(Self::Averages),
            "PEAK" => Ok(Self::Peak),
            "HRES" => Ok(Self::HighResolution),
            other => Err(InstrumentError::UnexpectedReply {
                detail: format!("unknown acquisition mode '{other}'"),
            }
            .into()),
        }
    }
}

/// Channel input coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
    Gnd,
}

impl Coupling {
    fn command(self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Dc => "DC",
            Self::Gnd => "GND",
        }
    }

    fn from_reply(reply: &str) -> Result<Self> {
        match reply {
            "AC" => Ok(Self::Ac),
            "DC" => Ok(Self::Dc),
            "GND" => Ok(Self::Gnd),
            other => Err(InstrumentError::UnexpectedReply {
                detail: format!("unknown coupling '{other}'"),
            }
            .into()),
        }
    }
}

/// Channel measurement units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelUnits {
    Volt,
    Watt,
    Amp,
    Unknown,
}

impl ChannelUnits {
    fn command(self) -> &'static str {
        match self {
            Self::Volt => "VOLT",
            Self::Watt => "WATT",
            Self::Amp => "AMP",
            Self::Unknown => "UNKN",
        }
    }
}

/// Sample memory depth (`:ACQ:MDEP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDepth {
    Auto,
    Points(u32),
}

impl MemoryDepth {
    fn command(self) -> String {
        match self {
            Self::Auto => "AUTO".to_string(),
            Self::Points(pts) => pts.to_string(),
        }
    }
}

/// Valid memory depths given the number of enabled channels.
fn allowed_depths(enabled_channels: usize) -> &'static [u32] {
    match enabled_channels {
        0 | 1 => &[12_000, 120_000, 1_200_000, 12_000_000, 24_000_000],
        2 => &[6_000, 60_000, 600_000, 6_000_000, 12_000_000],
        _ => &[3_000, 30_000, 300_000, 3_000_000, 6_000_000],
    }
}

/// Timebase display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimebaseMode {
    Main,
    Xy,
    Roll,
}

impl TimebaseMode {
    fn command(self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Xy => "XY",
            Self::Roll => "ROLL",
        }
    }

    fn from_reply(reply: &str) -> Result<Self> {
        match reply {
            "MAIN" => Ok(Self::Main),
            "XY" => Ok(Self::Xy),
            "ROLL" => Ok(Self::Roll),
            other => Err(InstrumentError::UnexpectedReply {
                detail: format!("unknown timebase mode '{other}'"),
            }
            .into()),
        }
    }
}

/// Which capture buffer a waveform download reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformMode {
    /// Only the points visible on screen.
    Normal,
    /// Everything the ADC captured.
    Raw,
}

impl WaveformMode {
    fn command(self) -> &'static str {
        match self {
            Self::Normal => "NORM",
            Self::Raw => "RAW",
        }
    }
}

/// Screenshot encoding for `:DISP:DATA?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Bmp8,
    Bmp24,
    Tiff,
}

impl ImageFormat {
    fn command(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Bmp8 => "BMP8",
            Self::Bmp24 => "BMP24",
            Self::Tiff => "TIFF",
        }
    }
}

/// The ten comma-separated fields of `:WAV:PRE?`.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreamble {
    pub format: u8,
    pub acquire_type: u8,
    pub points: usize,
    pub count: u32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

impl FromStr for WaveformPreamble {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        if fields.len() != 10 {
            bail!(InstrumentError::Parse {
                detail: format!("preamble has {} fields, expected 10", fields.len()),
            });
        }
        let parse_err = |i: usize| {
            anyhow!(InstrumentError::Parse {
                detail: format!("preamble field {i} '{}' is not numeric", fields[i]),
            })
        };
        Ok(Self {
            format: fields[0].parse().map_err(|_| parse_err(0))?,
            acquire_type: fields[1].parse().map_err(|_| parse_err(1))?,
            points: fields[2].parse().map_err(|_| parse_err(2))?,
            count: fields[3].parse().map_err(|_| parse_err(3))?,
            x_increment: fields[4].parse().map_err(|_| parse_err(4))?,
            x_origin: fields[5].parse().map_err(|_| parse_err(5))?,
            x_reference: fields[6].parse().map_err(|_| parse_err(6))?,
            y_increment: fields[7].parse().map_err(|_| parse_err(7))?,
            y_origin: fields[8].parse().map_err(|_| parse_err(8))?,
            y_reference: fields[9].parse().map_err(|_| parse_err(9))?,
        })
    }
}

/// A downloaded waveform, scaled to volts.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub preamble: WaveformPreamble,
    pub volts: Vec<f64>,
}

impl Waveform {
    /// Time axis in seconds, one entry per sample.
    pub fn time_axis(&self) -> Vec<f64> {
        (0..self.volts.len())
            .map(|i| i as f64 * self.preamble.x_increment)
            .collect()
    }
}

/// Rigol DS1000Z oscilloscope.
pub struct Ds1000z {
    conn: ScpiConnection,
    idn: String,
}

impl Ds1000z {
    /// Connect over the LAN SCPI socket (`host:port`, port 5555).
    pub async fn open(host: &str) -> Result<Self> {
        let conn = ScpiConnection::open_tcp("DS1000Z", host)
            .await?
            .with_timeout(Duration::from_secs(5));
        Self::init(conn).await
    }

    /// Wrap an already-open transport. Used by tests and simulators.
    pub async fn from_transport(transport: DynSerial) -> Result<Self> {
        let conn = ScpiConnection::from_transport("DS1000Z", transport)
            .with_timeout(Duration::from_secs(5));
        Self::init(conn).await
    }

    async fn init(conn: ScpiConnection) -> Result<Self> {
        let idn = conn.identify().await?;
        tracing::info!(idn = %idn, "Connected to DS1000Z");
        conn.configure_event_registers(1 | 4 | 8 | 16 | 32, 8 | 32)
            .await?;
        Ok(Self { conn, idn })
    }

    pub fn idn(&self) -> &str {
        &self.idn
    }

    pub async fn autoscale(&self) -> Result<()> {
        self.conn.checked_write(":AUT").await
    }

    /// Clear all displayed waveforms.
    pub async fn clear(&self) -> Result<()> {
        self.conn.checked_write(":CLE").await
    }

    pub async fn run(&self) -> Result<()> {
        self.conn.checked_write(":RUN").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.conn.checked_write(":STOP").await
    }

    /// Force a trigger event.
    pub async fn force_trigger(&self) -> Result<()> {
        self.conn.checked_write(":TFOR").await
    }

    /// Arm a single-shot acquisition.
    pub async fn single(&self) -> Result<()> {
        self.conn.checked_write(":SING").await
    }

    /// Set the averaging count. Must be a power of two in 2..=1024.
    pub async fn set_averaging(&self, count: u32) -> Result<()> {
        if !count.is_power_of_two() || !(2..=1024).contains(&count) {
            bail!("averaging count {count} must be a power of two in 2..=1024");
        }
        self.conn.checked_write(&format!(":ACQ:AVER {count}")).await
    }

    pub async fn averaging(&self) -> Result<u32> {
        let reply = self.conn.query(":ACQ:AVER?").await?;
        reply.parse().map_err(|_| {
            anyhow!(InstrumentError::Parse {
                detail: format!("averaging reply '{reply}' is not an integer"),
            })
        })
    }

    pub async fn set_acquire_mode(&self, mode: AcquireMode) -> Result<()> {
        self.conn
            .checked_write(&format!(":ACQ:TYPE {}", mode.command()))
            .await
    }

    pub async fn acquire_mode(&self) -> Result<AcquireMode> {
        let reply = self.conn.query(":ACQ:TYPE?").await?;
        AcquireMode::from_reply(&reply)
    }

    /// Current sampling rate in samples per second.
    pub async fn sampling_rate(&self) -> Result<f64> {
        self.conn.query_f64(":ACQ:SRAT?").await
    }

    pub async fn memory_depth(&self) -> Result<MemoryDepth> {
        let reply = self.conn.query(":ACQ:MDEP?").await?;
        if reply == "AUTO" {
            Ok(MemoryDepth::Auto)
        } else {
            let pts = reply.parse().map_err(|_| {
                anyhow!(InstrumentError::Parse {
                    detail: format!("memory depth reply '{reply}' is not an integer"),
                })
            })?;
            Ok(MemoryDepth::Points(pts))
        }
    }

    /// Set the sample memory depth.
    ///
    /// The valid depths depend on how many channels are enabled, so this
    /// queries the channel display states first, then puts the scope in run
    /// mode (depth cannot change while stopped).
    pub async fn set_memory_depth(&self, depth: MemoryDepth) -> Result<()> {
        if let MemoryDepth::Points(pts) = depth {
            let enabled = self.enabled_channel_count().await?;
            if !allowed_depths(enabled).contains(&pts) {
                bail!(
                    "memory depth {pts} is invalid with {enabled} enabled channel(s), \
                     expected one of {:?}",
                    allowed_depths(enabled)
                );
            }
        }
        self.run().await?;
        self.conn
            .checked_write(&format!(":ACQ:MDEP {}", depth.command()))
            .await
    }

    async fn enabled_channel_count(&self) -> Result<usize> {
        let mut count = 0;
        for n in 1..=4 {
            if self.channel(n)?.is_enabled().await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Borrow a handle for channel `n` (1..=4).
    pub fn channel(&self, n: u8) -> Result<Channel<'_>> {
        if !(1..=4).contains(&n) {
            return Err(InstrumentError::ChannelOutOfRange { channel: n, max: 4 }.into());
        }
        Ok(Channel { osc: self, n })
    }

    /// Borrow the edge-trigger handle.
    pub fn trigger(&self) -> Trigger<'_> {
        Trigger { osc: self }
    }

    /// Borrow the timebase handle.
    pub fn timebase(&self) -> Timebase<'_> {
        Timebase { osc: self }
    }

    /// Download the current screen image.
    pub async fn screenshot(&self, format: ImageFormat) -> Result<Vec<u8>> {
        self.conn
            .query_block(&format!(":DISP:DATA? ON,OFF,{}", format.command()))
            .await
    }
}

/// One analog input channel.
pub struct Channel<'a> {
    osc: &'a Ds1000z,
    n: u8,
}

impl Channel<'_> {
    fn cmd(&self, suffix: &str) -> String {
        format!(":CHAN{}{}", self.n, suffix)
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        let state = u8::from(on);
        self.osc.conn.checked_write(&self.cmd(&format!(":DISP {state}"))).await
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        let reply = self.osc.conn.query(&self.cmd(":DISP?")).await?;
        Ok(reply.trim() == "1")
    }

    pub async fn set_coupling(&self, coupling: Coupling) -> Result<()> {
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":COUP {}", coupling.command())))
            .await
    }

    pub async fn coupling(&self) -> Result<Coupling> {
        let reply = self.osc.conn.query(&self.cmd(":COUP?")).await?;
        Coupling::from_reply(&reply)
    }

    /// Set the vertical offset in volts (±1000 V).
    pub async fn set_offset(&self, volts: f64) -> Result<()> {
        if !(-1000.0..=1000.0).contains(&volts) {
            bail!("channel offset {volts} V out of range (-1000..=1000)");
        }
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":OFFS {volts:.4e}")))
            .await
    }

    pub async fn offset(&self) -> Result<f64> {
        self.osc.conn.query_f64(&self.cmd(":OFFS?")).await
    }

    /// Set the full-screen vertical range in volts (8 mV to 800 V).
    pub async fn set_range(&self, volts: f64) -> Result<()> {
        if !(8e-3..=800.0).contains(&volts) {
            bail!("channel range {volts} V out of range (0.008..=800)");
        }
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":RANG {volts:.4e}")))
            .await
    }

    pub async fn range(&self) -> Result<f64> {
        self.osc.conn.query_f64(&self.cmd(":RANG?")).await
    }

    /// Set the per-division vertical scale in volts (1 mV to 100 V).
    pub async fn set_scale(&self, volts_per_div: f64) -> Result<()> {
        if !(1e-3..=100.0).contains(&volts_per_div) {
            bail!("vertical scale {volts_per_div} V/div out of range (0.001..=100)");
        }
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":SCAL {volts_per_div:.4e}")))
            .await
    }

    pub async fn scale(&self) -> Result<f64> {
        self.osc.conn.query_f64(&self.cmd(":SCAL?")).await
    }

    pub async fn set_probe_ratio(&self, ratio: f64) -> Result<()> {
        const ALLOWED: [f64; 16] = [
            0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0,
            500.0, 1000.0,
        ];
        if !ALLOWED.contains(&ratio) {
            bail!("probe ratio {ratio} is not a supported attenuation");
        }
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":PROB {ratio}")))
            .await
    }

    pub async fn probe_ratio(&self) -> Result<f64> {
        self.osc.conn.query_f64(&self.cmd(":PROB?")).await
    }

    pub async fn set_units(&self, units: ChannelUnits) -> Result<()> {
        self.osc
            .conn
            .checked_write(&self.cmd(&format!(":UNIT {}", units.command())))
            .await
    }

    pub async fn units(&self) -> Result<String> {
        self.osc.conn.query(&self.cmd(":UNIT?")).await
    }

    /// Query the waveform preamble for the currently selected source.
    pub async fn preamble(&self) -> Result<WaveformPreamble> {
        let reply = self.osc.conn.query(":WAV:PRE?").await?;
        reply.parse()
    }

    /// Download this channel's capture and scale it to volts.
    ///
    /// Stops the acquisition, selects this channel as the waveform source,
    /// and reads the data in blocks of at most 250000 points.
    pub async fn read_waveform(&self, mode: WaveformMode) -> Result<Waveform> {
        let conn = &self.osc.conn;
        self.osc.stop().await?;
        conn.checked_write(&format!(":WAV:SOUR CHAN{}", self.n)).await?;
        conn.checked_write(&format!(":WAV:MODE {}", mode.command())).await?;
        conn.checked_write(":WAV:FORM BYTE").await?;

        let preamble = self.preamble().await?;
        let mut raw: Vec<u8> = Vec::with_capacity(preamble.points);

        let mut start = 1usize;
        while start <= preamble.points {
            let stop = (start + MAX_BLOCK_POINTS - 1).min(preamble.points);
            conn.checked_write(&format!(":WAV:STAR {start}")).await?;
            conn.checked_write(&format!(":WAV:STOP {stop}")).await?;
            let block = conn.query_block(":WAV:DATA?").await?;
            raw.extend_from_slice(&block);
            start = stop + 1;
        }

        let volts = scale_to_volts(&raw, &preamble);
        tracing::debug!(channel = self.n, points = volts.len(), "waveform downloaded");
        Ok(Waveform { preamble, volts })
    }
}

fn scale_to_volts(raw: &[u8], pre: &WaveformPreamble) -> Vec<f64> {
    raw.iter()
        .map(|&b| (f64::from(b) - pre.y_origin - pre.y_reference) * pre.y_increment)
        .collect()
}

/// Edge trigger settings.
pub struct Trigger<'a> {
    osc: &'a Ds1000z,
}

impl Trigger<'_> {
    /// Set the edge trigger level in volts.
    pub async fn set_edge_level(&self, volts: f64) -> Result<()> {
        self.osc
            .conn
            .checked_write(&format!(":TRIG:EDG:LEV {volts:.3e}"))
            .await
    }

    pub async fn edge_level(&self) -> Result<f64> {
        self.osc.conn.query_f64(":TRIG:EDG:LEV?").await
    }

    /// Set the trigger holdoff in seconds.
    pub async fn set_holdoff(&self, seconds: f64) -> Result<()> {
        self.osc
            .conn
            .checked_write(&format!(":TRIG:HOLD {seconds:.3e}"))
            .await
    }

    pub async fn holdoff(&self) -> Result<f64> {
        self.osc.conn.query_f64(":TRIG:HOLD?").await
    }

    /// The sweep mode (AUTO, NORM or SING).
    pub async fn sweep(&self) -> Result<String> {
        self.osc.conn.query(":TRIG:SWE?").await
    }

    /// Trigger on edges from channel `n` (1..=4).
    pub async fn set_edge_source(&self, n: u8) -> Result<()> {
        if !(1..=4).contains(&n) {
            return Err(InstrumentError::ChannelOutOfRange { channel: n, max: 4 }.into());
        }
        self.osc
            .conn
            .checked_write(&format!(":TRIG:EDG:SOUR CHAN{n}"))
            .await
    }

    pub async fn edge_source(&self) -> Result<String> {
        self.osc.conn.query(":TRIG:EDG:SOUR?").await
    }
}

/// Horizontal timebase settings.
pub struct Timebase<'a> {
    osc: &'a Ds1000z,
}

impl Timebase<'_> {
    /// Set the main timebase in seconds per division (50 ns to 50 s).
    pub async fn set_scale(&self, seconds_per_div: f64) -> Result<()> {
        if !(50e-9..=50.0).contains(&seconds_per_div) {
            bail!("timebase scale {seconds_per_div} s/div out of range (50e-9..=50)");
        }
        self.osc
            .conn
            .checked_write(&format!(":TIM:SCAL {seconds_per_div:.4e}"))
            .await
    }

    pub async fn scale(&self) -> Result<f64> {
        self.osc.conn.query_f64(":TIM:SCAL?").await
    }

    pub async fn set_mode(&self, mode: TimebaseMode) -> Result<()> {
        self.osc
            .conn
            .checked_write(&format!(":TIM:MODE {}", mode.command()))
            .await
    }

    pub async fn mode(&self) -> Result<TimebaseMode> {
        let reply = self.osc.conn.query(":TIM:MODE?").await?;
        TimebaseMode::from_reply(&reply)
    }

    /// Set the horizontal offset in seconds.
    ///
    /// The instrument's offset axis runs opposite to the delay most users
    /// expect, so the value is negated on the wire; `offset()` reads back
    /// the instrument's sign convention.
    pub async fn set_offset(&self, seconds: f64) -> Result<()> {
        self.osc
            .conn
            .checked_write(&format!(":TIM:OFFS {:.4e}", -seconds))
            .await
    }

    pub async fn offset(&self) -> Result<f64> {
        self.osc.conn.query_f64(":TIM:OFFS?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;

    /// Scripted DS1000Z peer. Records every received command and answers
    /// the queries a waveform download needs.
    fn spawn_peer(
        host: tokio::io::DuplexStream,
        preamble: &'static str,
        data: &'static [u8],
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(host);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let cmd = line.trim().to_string();
                let _ = tx.send(cmd.clone());
                let reply: Option<Vec<u8>> = match cmd.as_str() {
                    "*IDN?" => Some(b"RIGOL TECHNOLOGIES,DS1104Z,DS1ZA0001,00.04.04\n".to_vec()),
                    "*ESR?" | "*STB?" => Some(b"0\n".to_vec()),
                    ":WAV:PRE?" => Some(format!("{preamble}\n").into_bytes()),
                    ":WAV:DATA?" => {
                        let mut block = format!("#9{:09}", data.len()).into_bytes();
                        block.extend_from_slice(data);
                        block.push(b'\n');
                        Some(block)
                    }
                    ":ACQ:TYPE?" => Some(b"AVER\n".to_vec()),
                    ":TIM:OFFS?" => Some(b"-2.0000e-3\n".to_vec()),
                    c if c.starts_with(":CHAN") && c.ends_with(":DISP?") => {
                        Some(b"1\n".to_vec())
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    reader.get_mut().write_all(&reply).await.unwrap();
                }
            }
        });
        rx
    }

    async fn connect() -> (Ds1000z, mpsc::UnboundedReceiver<String>) {
        let (host, device) = tokio::io::duplex(4096);
        let rx = spawn_peer(host, "0,0,4,1,1.0e-6,0.0,0.0,0.5,2.0,10.0", b"\x20\x28\x30\x38");
        let scope = Ds1000z::from_transport(Box::new(device)).await.unwrap();
        (scope, rx)
    }

    #[test]
    fn preamble_parses_all_ten_fields() {
        let pre: WaveformPreamble = "0,2,1200,1,1.0e-6,-6.0e-4,0,4.0e-2,2,127"
            .parse()
            .unwrap();
        assert_eq!(pre.points, 1200);
        assert_eq!(pre.acquire_type, 2);
        assert!((pre.x_increment - 1.0e-6).abs() < 1e-18);
        assert!((pre.y_reference - 127.0).abs() < f64::EPSILON);
    }

    #[test]
    fn preamble_rejects_wrong_field_count() {
        assert!("1,2,3".parse::<WaveformPreamble>().is_err());
    }

    #[test]
    fn memory_depth_table_tracks_enabled_channels() {
        assert!(allowed_depths(1).contains(&24_000_000));
        assert!(!allowed_depths(2).contains(&24_000_000));
        assert!(allowed_depths(2).contains(&12_000_000));
        assert!(allowed_depths(4).contains(&6_000_000));
        assert!(!allowed_depths(3).contains(&12_000_000));
    }

    #[test]
    fn raw_samples_scale_through_preamble() {
        let pre = WaveformPreamble {
            format: 0,
            acquire_type: 0,
            points: 2,
            count: 1,
            x_increment: 1e-6,
            x_origin: 0.0,
            x_reference: 0.0,
            y_increment: 0.5,
            y_origin: 2.0,
            y_reference: 10.0,
        };
        let volts = scale_to_volts(&[12, 20], &pre);
        assert!((volts[0] - 0.0).abs() < f64::EPSILON);
        assert!((volts[1] - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn averaging_count_must_be_power_of_two() {
        let (scope, _rx) = connect().await;
        assert!(scope.set_averaging(3).await.is_err());
        assert!(scope.set_averaging(2048).await.is_err());
        assert!(scope.set_averaging(64).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_mode_round_trips_reply() {
        let (scope, _rx) = connect().await;
        assert_eq!(scope.acquire_mode().await.unwrap(), AcquireMode::Averages);
    }

    #[tokio::test]
    async fn channel_index_is_validated() {
        let (scope, _rx) = connect().await;
        assert!(scope.channel(0).is_err());
        assert!(scope.channel(5).is_err());
        assert!(scope.channel(4).is_ok());
    }

    #[tokio::test]
    async fn waveform_downloads_and_scales() {
        let (scope, _rx) = connect().await;
        let wave = scope
            .channel(1)
            .unwrap()
            .read_waveform(WaveformMode::Normal)
            .await
            .unwrap();
        assert_eq!(wave.volts.len(), 4);
        // (0x20 - 2 - 10) * 0.5
        assert!((wave.volts[0] - 10.0).abs() < f64::EPSILON);
        let t = wave.time_axis();
        assert!((t[3] - 3.0e-6).abs() < 1e-18);
    }

    #[tokio::test]
    async fn timebase_offset_is_negated_on_the_wire() {
        let (scope, mut rx) = connect().await;
        scope.timebase().set_offset(2.0e-3).await.unwrap();
        let mut saw = false;
        while let Ok(cmd) = rx.try_recv() {
            if cmd.starts_with(":TIM:OFFS ") {
                assert!(cmd.contains('-'), "offset was not negated: {cmd}");
                saw = true;
            }
        }
        assert!(saw, "no :TIM:OFFS command observed");
    }
}
