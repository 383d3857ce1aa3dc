//! Byte-stream link to the device.
//!
//! Reads and writes are guarded by separate locks, so a read parked waiting
//! on a silent device never holds up a command write.

pub mod simulated;

pub use simulated::{DeviceScript, ScriptStep, SimulatedDevice};

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::config::TransportConfig;
use crate::error::{Result, SatlinkError};

type LineReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct DeviceChannel {
    reader: Mutex<LineReader>,
    writer: Mutex<LineWriter>,
    connected: AtomicBool,
    description: String,
}

impl DeviceChannel {
    /// Open the link described by `config`.
    pub async fn open(config: &TransportConfig) -> Result<Self> {
        let description = config.to_string();
        let channel = match config {
            TransportConfig::Simulated(timing) => {
                let link = SimulatedDevice::new(DeviceScript::standard(timing)).spawn();
                Self::from_stream(link, description)
            }
            TransportConfig::Tcp { addr } => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(|e| SatlinkError::Connection(format!("{}: {}", addr, e)))?;
                stream.set_nodelay(true).map_err(|e| {
                    SatlinkError::Connection(format!("{}: {}", addr, e))
                })?;
                let (read_half, write_half) = stream.into_split();
                Self::from_parts(read_half, write_half, description)
            }
            TransportConfig::Device { path } => {
                // Separate handles: a file handle serializes its own operations.
                let open_err =
                    |e: std::io::Error| SatlinkError::Connection(format!("{}: {}", path.display(), e));
                let read_half = tokio::fs::OpenOptions::new()
                    .read(true)
                    .open(path)
                    .await
                    .map_err(open_err)?;
                let write_half = tokio::fs::OpenOptions::new()
                    .write(true)
                    .open(path)
                    .await
                    .map_err(open_err)?;
                Self::from_parts(read_half, write_half, description)
            }
        };
        tracing::info!(link = %channel.description, "Device link open");
        Ok(channel)
    }

    /// Wrap a bidirectional stream.
    pub fn from_stream<S>(stream: S, description: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(read_half, write_half, description)
    }

    pub fn from_parts<R, W>(read_half: R, write_half: W, description: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
        Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(Box::new(write_half)),
            connected: AtomicBool::new(true),
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let read = {
            let mut reader = self.reader.lock().await;
            reader.read_until(b'\n', &mut buf).await
        };
        match read {
            Ok(0) => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(None)
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(SatlinkError::Connection(e.to_string()))
            }
        }
    }

    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(SatlinkError::Write(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device link closed",
            )));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await.map_err(SatlinkError::Write)?;
        writer.flush().await.map_err(SatlinkError::Write)?;
        Ok(())
    }

    /// Stop accepting writes and shut down the outbound half.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "Error shutting down device link");
        }
        tracing::info!(link = %self.description, "Device link closed");
    }
}

impl std::fmt::Debug for DeviceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceChannel")
            .field("description", &self.description)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn read_line_strips_terminators() {
        let (host, mut device) = tokio::io::duplex(1024);
        let channel = DeviceChannel::from_stream(host, "test");

        device.write_all(b"first\r\nsecond\n\nlast").await.unwrap();
        drop(device);

        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some("last"));
        assert_eq!(channel.read_line().await.unwrap(), None);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn write_reaches_device() {
        let (host, mut device) = tokio::io::duplex(1024);
        let channel = DeviceChannel::from_stream(host, "test");

        channel.write(b"TEST custom f 1 1\n").await.unwrap();
        let mut buf = [0u8; 18];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"TEST custom f 1 1\n");
    }

    #[tokio::test]
    async fn write_while_read_pending() {
        let (host, mut device) = tokio::io::duplex(1024);
        let channel = std::sync::Arc::new(DeviceChannel::from_stream(host, "test"));

        let reader = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.read_line().await })
        };
        tokio::task::yield_now().await;

        channel.write(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        device.write_all(b"pong\n").await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (host, _device) = tokio::io::duplex(64);
        let channel = DeviceChannel::from_stream(host, "test");
        channel.close().await;
        assert!(matches!(
            channel.write(b"x\n").await,
            Err(SatlinkError::Write(_))
        ));
    }

    #[tokio::test]
    async fn open_simulated_link() {
        let config = TransportConfig::Simulated(crate::config::SimulatorTiming::immediate());
        let channel = DeviceChannel::open(&config).await.unwrap();
        channel.write(b"TEST custom f 1 1\n").await.unwrap();
        assert_eq!(
            channel.read_line().await.unwrap().as_deref(),
            Some("ECHO: TEST custom f 1 1")
        );
    }

    #[tokio::test]
    async fn open_missing_device_is_connection_error() {
        let config = TransportConfig::Device {
            path: "/nonexistent/satlink-device".into(),
        };
        assert!(matches!(
            DeviceChannel::open(&config).await,
            Err(SatlinkError::Connection(_))
        ));
    }
}
