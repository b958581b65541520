//! Type-erased async serial ports.
//!
//! Every serial driver in the workspace talks to a `Box<dyn SerialPortIO>`
//! rather than a concrete `tokio_serial::SerialStream`, so the same code path
//! runs against real hardware and against `tokio::io::duplex` peers in tests.
//! Line-oriented protocols (SCPI over RS-232) use the buffered [`SharedPort`];
//! the Elliptec bus manages its own framing and uses
//! [`SharedPortUnbuffered`].

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Anything usable as an async serial port.
///
/// Covers `tokio_serial::SerialStream`, `tokio::net::TcpStream`, and
/// `tokio::io::DuplexStream` via the blanket impl.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Shared serial port with buffered reading, for line-delimited protocols.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Shared serial port without buffering, for protocols that frame their own
/// reads.
pub type SharedPortUnbuffered = Arc<Mutex<DynSerial>>;

/// Wrap a port for line-oriented shared use.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Wrap a port for byte-oriented shared use.
pub fn wrap_shared_unbuffered(port: DynSerial) -> SharedPortUnbuffered {
    Arc::new(Mutex::new(port))
}

/// Open a serial port asynchronously with standard instrument settings
/// (8N1, no flow control).
///
/// The blocking open runs on the blocking pool so the async runtime is not
/// stalled while the OS probes the device.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let device = device_name.to_string();

    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("opening {device} serial port at {path}"))
    })
    .await
    .context("serial open task panicked")?
}

/// Read and discard whatever is sitting in the receive buffer.
///
/// Multidrop buses and echoing instruments leave stale bytes behind;
/// draining before a command keeps replies aligned with requests. Returns
/// the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(n)) if n > 0 => total += n,
            // EOF, read error or timeout all mean the buffer is as empty
            // as it is going to get.
            _ => break,
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn shared_port_reads_lines_from_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));

        host.write_all(b"0GS00\r\n").await.unwrap();

        let mut guard = port.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "0GS00");
    }

    #[tokio::test]
    async fn drain_discards_stale_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"stale reply").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let discarded = drain_serial_buffer(&mut device, 50).await;
        assert_eq!(discarded, 11);
    }

    #[tokio::test]
    async fn shared_port_clones_see_same_stream() {
        let (mut host, device) = tokio::io::duplex(64);
        let port: SharedPort = wrap_shared(Box::new(device));
        let clone = port.clone();

        host.write_all(b"data\n").await.unwrap();

        let mut guard = clone.lock().await;
        let mut line = String::new();
        guard.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "data");
    }
}
