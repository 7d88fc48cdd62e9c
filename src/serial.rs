//! Serial link plumbing.
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`PortOpener`]: opens a port path; [`SystemOpener`] uses tokio-serial
//! - [`Link`]: one open port with newline framing and deadline-bounded reads
//! - [`drain_serial_buffer`]: discard stale bytes before a command
//!
//! Tests substitute `tokio::io::DuplexStream` for real hardware.

use crate::config::LinkConfig;
use crate::error::{BulbError, BulbResult};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::Instant;

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream`, `tokio::io::DuplexStream`, and
/// any mock meeting the bounds.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Opens candidate ports for the connector.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `port` with the fixed link parameters.
    ///
    /// # Errors
    /// `PortUnavailable` for permission, busy or I/O failures.
    async fn open(&self, port: &str, config: &LinkConfig) -> BulbResult<DynSerial>;
}

/// Opens real serial hardware through tokio-serial.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

#[cfg(feature = "serial")]
#[async_trait]
impl PortOpener for SystemOpener {
    async fn open(&self, port: &str, config: &LinkConfig) -> BulbResult<DynSerial> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let port_owned = port.to_string();
        let baud_rate = config.baud_rate;
        let timeout = config.io_timeout();

        // Opening can block on some drivers; keep it off the async workers
        let stream = spawn_blocking(move || {
            tokio_serial::new(&port_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(timeout)
                .open_native_async()
        })
        .await
        .map_err(|e| BulbError::PortUnavailable {
            port: port.to_string(),
            reason: format!("spawn_blocking for port opening failed: {}", e),
        })?
        .map_err(|e| BulbError::PortUnavailable {
            port: port.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(port, baud_rate, timeout_ms = ?timeout.as_millis(), "Opened serial port");
        Ok(Box::new(stream))
    }
}

#[cfg(not(feature = "serial"))]
#[async_trait]
impl PortOpener for SystemOpener {
    async fn open(&self, port: &str, _config: &LinkConfig) -> BulbResult<DynSerial> {
        Err(BulbError::PortUnavailable {
            port: port.to_string(),
            reason: "serial support disabled - rebuild with --features serial".to_string(),
        })
    }
}

/// Drain stale data from a serial port.
///
/// Reads and discards until nothing arrives for the rest of `window`, the
/// stream reports EOF, or an error occurs. Returns the number of bytes dropped.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 256];
    let deadline = Instant::now() + window;
    let mut total_discarded = 0usize;

    loop {
        match tokio::time::timeout_at(deadline, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

/// One open serial port with newline framing.
///
/// Partial lines survive a read deadline and are completed by the next read,
/// so a slow device never splits a reply into two bogus lines.
pub struct Link {
    port: String,
    reader: BufReader<DynSerial>,
    partial: Vec<u8>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("port", &self.port).finish()
    }
}

impl Link {
    /// Wrap an open port.
    pub fn new(port: impl Into<String>, io: DynSerial) -> Self {
        Self {
            port: port.into(),
            reader: BufReader::new(io),
            partial: Vec::new(),
        }
    }

    /// Path of the underlying port.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Discard everything already buffered plus whatever arrives within `window`.
    pub async fn discard_input(&mut self, window: Duration) -> usize {
        let buffered = self.reader.buffer().len();
        Pin::new(&mut self.reader).consume(buffered);
        let partial = self.partial.len();
        self.partial.clear();

        let drained = drain_serial_buffer(self.reader.get_mut(), window).await;
        let total = buffered + partial + drained;
        if total > 0 {
            tracing::debug!(port = %self.port, bytes = total, "Discarded stale input");
        }
        total
    }

    /// Write one newline-terminated line and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let io = self.reader.get_mut();
        io.write_all(format!("{}\n", line).as_bytes()).await?;
        io.flush().await
    }

    /// Read the next line, trimmed, before `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline passes first. End of stream is an
    /// error: the device went away.
    pub async fn read_line_until(&mut self, deadline: Instant) -> io::Result<Option<String>> {
        match tokio::time::timeout_at(deadline, self.reader.read_until(b'\n', &mut self.partial))
            .await
        {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) if self.partial.last() == Some(&b'\n') => {
                let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                self.partial.clear();
                Ok(Some(line))
            }
            Ok(Ok(_)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("serial link {} closed", self.port),
            )),
        }
    }

    /// Collect every non-empty line arriving within `window`.
    pub async fn collect_lines(&mut self, window: Duration) -> io::Result<Vec<String>> {
        let deadline = Instant::now() + window;
        let mut lines = Vec::new();
        while let Some(line) = self.read_line_until(deadline).await? {
            if !line.is_empty() {
                tracing::trace!(port = %self.port, line = %line, "Received line");
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_reads_trimmed_lines() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = Link::new("mock", Box::new(device));

        host.write_all(b"OK:B1 ON\r\n").await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(200);
        let line = link.read_line_until(deadline).await.unwrap();
        assert_eq!(line.as_deref(), Some("OK:B1 ON"));
    }

    #[tokio::test]
    async fn test_partial_line_survives_deadline() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = Link::new("mock", Box::new(device));

        host.write_all(b"STAT").await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(link.read_line_until(deadline).await.unwrap().is_none());

        host.write_all(b"US:B1:0\n").await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        let line = link.read_line_until(deadline).await.unwrap();
        assert_eq!(line.as_deref(), Some("STATUS:B1:0"));
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let (host, device) = tokio::io::duplex(64);
        let mut link = Link::new("mock", Box::new(device));
        drop(host);

        let deadline = Instant::now() + Duration::from_millis(200);
        let err = link.read_line_until(deadline).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = Link::new("mock", Box::new(device));

        link.write_line("B1 ON").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"B1 ON\n");
    }

    #[tokio::test]
    async fn test_scripted_ping_exchange() {
        let port = tokio_test::io::Builder::new()
            .write(b"PING\n")
            .read(b"PONG\r\n")
            .build();
        let mut link = Link::new("scripted", Box::new(port));

        link.write_line("PING").await.unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        let line = link.read_line_until(deadline).await.unwrap();
        assert_eq!(line.as_deref(), Some("PONG"));
    }

    #[tokio::test]
    async fn test_collect_lines_skips_blank_lines() {
        let (mut host, device) = tokio::io::duplex(128);
        let mut link = Link::new("mock", Box::new(device));

        host.write_all(b"SMART_BULBS v3\n\nVOICE_READY\n").await.unwrap();
        let lines = link.collect_lines(Duration::from_millis(50)).await.unwrap();
        assert_eq!(lines, vec!["SMART_BULBS v3", "VOICE_READY"]);
    }

    #[tokio::test]
    async fn test_discard_input_drops_stale_bytes() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut link = Link::new("mock", Box::new(device));

        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = link.discard_input(Duration::from_millis(30)).await;
        assert_eq!(discarded, 16);

        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(link.read_line_until(deadline).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_serial_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"noise").await.unwrap();
        let discarded = drain_serial_buffer(&mut device, Duration::from_millis(30)).await;
        assert_eq!(discarded, 5);
    }
}
