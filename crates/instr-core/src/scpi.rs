//! Line-oriented SCPI connection with status-register checked writes.
//!
//! SCPI instruments (Rigol DP832/DS1000Z, Thorlabs CLD1010/PM100D) accept
//! newline-terminated ASCII commands over a LAN socket or serial port. Set
//! commands do not acknowledge, so after each one the driver issues `*WAI`
//! and reads the standard event register: bit 5 flags a syntax fault, bit 4
//! an execution fault. Bulk data (waveforms, screenshots) arrives as
//! IEEE-488.2 definite-length blocks (`#<n><len bytes><payload>`).

use crate::error::InstrumentError;
use crate::serial::{wrap_shared, DynSerial, SharedPort};
use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// ESR bit for a command syntax error.
const ESR_COMMAND_ERROR: u16 = 0x20;
/// ESR bit for an execution error.
const ESR_EXECUTION_ERROR: u16 = 0x10;

/// A shared SCPI connection over any serial-like transport.
///
/// Cloning is cheap; clones serialize their transactions on the underlying
/// port mutex, so a command and its reply are never interleaved with another
/// task's traffic.
#[derive(Clone)]
pub struct ScpiConnection {
    port: SharedPort,
    device: String,
    timeout: Duration,
    check_questionable: bool,
}

impl ScpiConnection {
    /// Wrap an already-open transport (serial port, TCP stream, test duplex).
    pub fn from_transport(device: &str, transport: DynSerial) -> Self {
        Self {
            port: wrap_shared(transport),
            device: device.to_string(),
            timeout: Duration::from_secs(1),
            check_questionable: false,
        }
    }

    /// Connect to an instrument's raw SCPI socket (`host:port`).
    pub async fn open_tcp(device: &str, addr: &str) -> Result<Self> {
        let stream = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::net::TcpStream::connect(addr),
        )
        .await
        .map_err(|_| InstrumentError::Connection {
            device: device.to_string(),
            detail: format!("{addr}: connect timed out"),
        })?
        .map_err(|e| InstrumentError::Connection {
            device: device.to_string(),
            detail: format!("{addr}: {e}"),
        })?;
        stream.set_nodelay(true)?;
        tracing::info!(device, addr, "Connected SCPI socket");
        Ok(Self::from_transport(device, Box::new(stream)))
    }

    /// Override the per-read timeout (default 1 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Also read `:STAT:QUES?` after each checked write (DP832 behavior).
    pub fn with_questionable_status(mut self) -> Self {
        self.check_questionable = true;
        self
    }

    /// Device name used in log and error messages.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Query `*IDN?`.
    pub async fn identify(&self) -> Result<String> {
        self.query("*IDN?").await
    }

    /// Write `*ESE`/`*SRE` to configure which events reach the status byte.
    pub async fn configure_event_registers(&self, ese: u16, sre: u16) -> Result<()> {
        self.write(&format!("*ESE {ese}")).await?;
        self.write(&format!("*SRE {sre}")).await
    }

    /// Send a command without reading a reply.
    pub async fn write(&self, cmd: &str) -> Result<()> {
        let mut guard = self.port.lock().await;
        write_line(&mut guard, cmd)
            .await
            .with_context(|| format!("{} write failed", self.device))
    }

    /// Send a query and return the trimmed single-line reply.
    pub async fn query(&self, cmd: &str) -> Result<String> {
        let mut guard = self.port.lock().await;
        write_line(&mut guard, cmd)
            .await
            .with_context(|| format!("{} write failed", self.device))?;
        let reply = self.read_line(&mut guard).await?;
        tracing::trace!(device = %self.device, cmd, reply = %reply, "SCPI query");
        Ok(reply)
    }

    /// Send a query and parse the reply as `f64`.
    pub async fn query_f64(&self, cmd: &str) -> Result<f64> {
        let reply = self.query(cmd).await?;
        reply
            .parse::<f64>()
            .map_err(|_| {
                InstrumentError::Parse {
                    detail: format!("[{cmd}] reply '{reply}' is not a number"),
                }
                .into()
            })
    }

    /// Send a command, wait for completion, and check the status registers.
    ///
    /// Writes the command, issues `*WAI`, then reads `*ESR?` and `*STB?`
    /// (and `:STAT:QUES?` when enabled) and raises if the event register
    /// reports a syntax or execution fault.
    pub async fn checked_write(&self, cmd: &str) -> Result<()> {
        let mut guard = self.port.lock().await;
        write_line(&mut guard, cmd)
            .await
            .with_context(|| format!("{} write failed", self.device))?;
        write_line(&mut guard, "*WAI").await?;

        write_line(&mut guard, "*ESR?").await?;
        let esr: u16 = self.read_register(&mut guard, "*ESR?").await?;
        write_line(&mut guard, "*STB?").await?;
        let stb: u16 = self.read_register(&mut guard, "*STB?").await?;

        let ques = if self.check_questionable {
            write_line(&mut guard, ":STAT:QUES?").await?;
            Some(self.read_register(&mut guard, ":STAT:QUES?").await?)
        } else {
            None
        };
        drop(guard);

        tracing::debug!(
            device = %self.device,
            cmd,
            esr,
            stb,
            ?ques,
            "SCPI checked write"
        );

        if esr & ESR_COMMAND_ERROR != 0 {
            return Err(InstrumentError::CommandSyntax { cmd: cmd.into() }.into());
        }
        if esr & ESR_EXECUTION_ERROR != 0 {
            return Err(InstrumentError::CommandExecution { cmd: cmd.into() }.into());
        }
        Ok(())
    }

    /// Send a query whose reply is an IEEE-488.2 definite-length block and
    /// return the payload bytes.
    pub async fn query_block(&self, cmd: &str) -> Result<Vec<u8>> {
        let mut guard = self.port.lock().await;
        write_line(&mut guard, cmd)
            .await
            .with_context(|| format!("{} write failed", self.device))?;

        let read = async {
            let mut marker = [0u8; 2];
            guard.read_exact(&mut marker).await?;
            if marker[0] != b'#' {
                return Err(anyhow!(InstrumentError::Parse {
                    detail: format!("block reply to [{cmd}] does not start with '#'"),
                }));
            }
            let ndigits = (marker[1] as char)
                .to_digit(10)
                .ok_or_else(|| InstrumentError::Parse {
                    detail: format!("invalid block length digit in reply to [{cmd}]"),
                })? as usize;
            let mut len_buf = vec![0u8; ndigits];
            guard.read_exact(&mut len_buf).await?;
            let len: usize = std::str::from_utf8(&len_buf)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| InstrumentError::Parse {
                    detail: format!("invalid block length field in reply to [{cmd}]"),
                })?;
            let mut payload = vec![0u8; len];
            guard.read_exact(&mut payload).await?;
            Ok::<_, anyhow::Error>(payload)
        };

        let payload = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| anyhow!("{} block read timeout for [{}]", self.device, cmd))??;

        // Terminator after the block, if the instrument sends one.
        let mut nl = [0u8; 1];
        let _ = tokio::time::timeout(Duration::from_millis(20), guard.read(&mut nl)).await;

        Ok(payload)
    }

    async fn read_line(&self, guard: &mut BufReader<DynSerial>) -> Result<String> {
        let mut line = String::new();
        match tokio::time::timeout(self.timeout, guard.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(InstrumentError::Disconnected.into()),
            Ok(Ok(_)) => Ok(line.trim().to_string()),
            Ok(Err(e)) => Err(anyhow!("{} read error: {}", self.device, e)),
            Err(_) => Err(anyhow!("{} read timeout", self.device)),
        }
    }

    async fn read_register(&self, guard: &mut BufReader<DynSerial>, query: &str) -> Result<u16> {
        let reply = self.read_line(guard).await?;
        reply.parse::<u16>().map_err(|_| {
            anyhow!(InstrumentError::Parse {
                detail: format!("[{query}] reply '{reply}' is not a register value"),
            })
        })
    }
}

async fn write_line(guard: &mut BufReader<DynSerial>, cmd: &str) -> Result<()> {
    let framed = format!("{cmd}\n");
    guard.get_mut().write_all(framed.as_bytes()).await?;
    guard.get_mut().flush().await?;
    Ok(())
}

/// Strip the IEEE-488.2 definite-length block header from a complete buffer.
///
/// Useful when a block has already been captured whole (tests, file dumps).
pub fn tmc_payload(raw: &[u8]) -> Result<&[u8]> {
    if raw.len() < 2 || raw[0] != b'#' {
        return Err(anyhow!(InstrumentError::Parse {
            detail: "buffer does not start with a block header".into(),
        }));
    }
    let ndigits = (raw[1] as char).to_digit(10).ok_or_else(|| {
        anyhow!(InstrumentError::Parse {
            detail: "invalid block length digit".into(),
        })
    })? as usize;
    let header = 2 + ndigits;
    if raw.len() < header {
        return Err(anyhow!(InstrumentError::Parse {
            detail: "truncated block header".into(),
        }));
    }
    let len: usize = std::str::from_utf8(&raw[2..header])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            anyhow!(InstrumentError::Parse {
                detail: "invalid block length field".into(),
            })
        })?;
    if raw.len() < header + len {
        return Err(anyhow!(InstrumentError::Parse {
            detail: "truncated block payload".into(),
        }));
    }
    Ok(&raw[header..header + len])
}

/// Setpoint convergence criteria for setter-with-confirmation calls.
///
/// After writing a setpoint, a driver polls the matching measurement until
/// it lands within `tolerance` of the target or `timeout` elapses. Both are
/// caller-configurable; the poll interval defaults to 100 ms.
#[derive(Debug, Clone, Copy)]
pub struct Settle {
    pub tolerance: f64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Settle {
    /// Convergence within `tolerance` of the target, bounded by `timeout`.
    pub fn within(tolerance: f64, timeout: Duration) -> Self {
        Self {
            tolerance,
            timeout,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Override the poll interval.
    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll `read` until it returns a value within tolerance of `target`.
    ///
    /// Returns the last measured value on success; raises
    /// [`InstrumentError::SetpointTimeout`] if the deadline passes first.
    pub async fn until<F, Fut>(&self, name: &str, target: f64, mut read: F) -> Result<f64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<f64>>,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut actual = read().await?;
        while (target - actual).abs() > self.tolerance {
            tokio::time::sleep(self.poll_interval).await;
            if tokio::time::Instant::now() > deadline {
                tracing::warn!(name, target, actual, "setpoint did not converge");
                return Err(InstrumentError::SetpointTimeout {
                    name: name.to_string(),
                    target,
                    actual,
                    timeout: self.timeout,
                }
                .into());
            }
            actual = read().await?;
        }
        tracing::debug!(name, target, actual, "setpoint reached");
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};

    /// Peer that answers register queries with fixed values.
    fn spawn_register_peer(host: tokio::io::DuplexStream, esr: u16, stb: u16) {
        tokio::spawn(async move {
            let mut reader = TokioBufReader::new(host);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let reply = match line.trim() {
                    "*ESR?" => Some(format!("{esr}\n")),
                    "*STB?" => Some(format!("{stb}\n")),
                    ":STAT:QUES?" => Some("0\n".to_string()),
                    _ => None,
                };
                if let Some(reply) = reply {
                    reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn query_returns_trimmed_reply() {
        let (host, device) = tokio::io::duplex(256);
        let conn = ScpiConnection::from_transport("test", Box::new(device));

        tokio::spawn(async move {
            let mut reader = TokioBufReader::new(host);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "*IDN?");
            reader
                .get_mut()
                .write_all(b"RIGOL TECHNOLOGIES,DP832,DP8A0000000001,00.01.16\n")
                .await
                .unwrap();
        });

        let idn = conn.identify().await.unwrap();
        assert!(idn.starts_with("RIGOL TECHNOLOGIES,DP832"));
    }

    #[tokio::test]
    async fn checked_write_passes_when_esr_clear() {
        let (host, device) = tokio::io::duplex(256);
        let conn = ScpiConnection::from_transport("test", Box::new(device));
        spawn_register_peer(host, 0, 0);

        conn.checked_write(":OUTP CH1,ON").await.unwrap();
    }

    #[tokio::test]
    async fn checked_write_maps_syntax_bit() {
        let (host, device) = tokio::io::duplex(256);
        let conn = ScpiConnection::from_transport("test", Box::new(device));
        spawn_register_peer(host, 32, 0);

        let err = conn.checked_write(":BOGUS").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstrumentError>(),
            Some(InstrumentError::CommandSyntax { .. })
        ));
    }

    #[tokio::test]
    async fn checked_write_maps_execution_bit() {
        let (host, device) = tokio::io::duplex(256);
        let conn = ScpiConnection::from_transport("test", Box::new(device));
        spawn_register_peer(host, 16, 0);

        let err = conn.checked_write(":SOUR1:VOLT 99").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstrumentError>(),
            Some(InstrumentError::CommandExecution { .. })
        ));
    }

    #[tokio::test]
    async fn query_block_reads_definite_length_payload() {
        let (mut host, device) = tokio::io::duplex(256);
        let conn = ScpiConnection::from_transport("test", Box::new(device));

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = host.read(&mut buf).await.unwrap();
            host.write_all(b"#3005hello\n").await.unwrap();
        });

        let payload = conn.query_block(":WAV:DATA?").await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn tmc_payload_strips_header() {
        let raw = b"#9000000005abcde\n";
        assert_eq!(tmc_payload(raw).unwrap(), b"abcde");
    }

    #[test]
    fn tmc_payload_rejects_garbage() {
        assert!(tmc_payload(b"abcdef").is_err());
        assert!(tmc_payload(b"#").is_err());
        assert!(tmc_payload(b"#3005ab").is_err());
    }

    #[tokio::test]
    async fn settle_converges_toward_target() {
        let reads = Arc::new(AtomicU32::new(0));
        let reads_in_closure = reads.clone();
        let settle = Settle::within(0.05, Duration::from_secs(1))
            .poll_every(Duration::from_millis(1));

        let value = settle
            .until("voltage", 1.0, move || {
                let n = reads_in_closure.fetch_add(1, Ordering::SeqCst);
                async move { Ok(f64::from(n) * 0.25) }
            })
            .await
            .unwrap();

        assert!((value - 1.0).abs() <= 0.05);
        assert!(reads.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn settle_times_out_when_never_converging() {
        let settle = Settle::within(0.01, Duration::from_millis(30))
            .poll_every(Duration::from_millis(5));

        let err = settle
            .until("current", 2.0, || async { Ok(0.0) })
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InstrumentError>(),
            Some(InstrumentError::SetpointTimeout { .. })
        ));
    }
}
