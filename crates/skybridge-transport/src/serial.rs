use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

use crate::error::{Result, TransportError};

/// Default flight-controller baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial link settings supplied by the collaborator at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`).
    pub path: String,
    /// Line rate in bits per second.
    pub baud_rate: u32,
    /// How long a read may block before returning a timeout.
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(10),
        }
    }
}

/// A byte link to the flight controller, usable as `Read + Write`.
///
/// Reads that hit the configured timeout surface as `TimedOut`/`WouldBlock`
/// I/O errors; callers treat those as "no data yet".
pub struct SerialLink {
    inner: SerialLinkInner,
}

enum SerialLinkInner {
    Port(Box<dyn SerialPort>),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl SerialLink {
    /// Open a UART as 8N1 without flow control.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(config.path.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                path: config.path.clone(),
                source,
            })?;

        info!(path = %config.path, baud = config.baud_rate, "opened serial link");

        Ok(Self {
            inner: SerialLinkInner::Port(port),
        })
    }

    /// Wrap a connected Unix stream (SITL sockets, test fixtures).
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: SerialLinkInner::Unix(stream),
        }
    }

    /// Set how long a read may block.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            SerialLinkInner::Port(port) => port.set_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            SerialLinkInner::Unix(stream) => stream
                .set_read_timeout(Some(timeout))
                .map_err(Into::into),
        }
    }

    /// Open a second handle onto the same link.
    ///
    /// The bridge reads from one handle and writes through the other.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            SerialLinkInner::Port(port) => SerialLinkInner::Port(port.try_clone()?),
            #[cfg(unix)]
            SerialLinkInner::Unix(stream) => SerialLinkInner::Unix(stream.try_clone()?),
        };
        Ok(Self { inner })
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialLinkInner::Port(port) => port.read(buf),
            #[cfg(unix)]
            SerialLinkInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialLinkInner::Port(port) => port.write(buf),
            #[cfg(unix)]
            SerialLinkInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            SerialLinkInner::Port(port) => port.flush(),
            #[cfg(unix)]
            SerialLinkInner::Unix(stream) => stream.flush(),
        }
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            SerialLinkInner::Port(port) => f
                .debug_struct("SerialLink")
                .field("type", &"uart")
                .field("name", &port.name())
                .finish(),
            #[cfg(unix)]
            SerialLinkInner::Unix(_) => f.debug_struct("SerialLink").field("type", &"unix").finish(),
        }
    }
}
