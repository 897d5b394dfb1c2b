use crate::metrics::REMOTE_CONNECTED;
use crate::protocol::MeterMessage;
use meter_core::{Device, DeviceError, Sample, TimeBase};
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// A line longer than this is treated as garbage and discarded.
const MAX_PENDING_BYTES: usize = 64 * 1024;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("socket setup failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RemoteError> for DeviceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Io(e) | RemoteError::Connect { source: e, .. } => DeviceError::Io(e),
            RemoteError::Resolve(addr) => DeviceError::Fault(format!("could not resolve {addr}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpMeterConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    /// Upper bound on a single `read`; expiry yields `Ok(None)`.
    pub read_timeout: Duration,
}

impl Default for TcpMeterConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7100".to_string(),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(50),
        }
    }
}

/// Meter reached over TCP, streaming newline-delimited [`MeterMessage`]s.
pub struct TcpMeter {
    stream: TcpStream,
    peer: SocketAddr,
    recv_buf: Vec<u8>,
    timebase: TimeBase,
    closed: bool,
}

impl TcpMeter {
    pub fn connect(config: &TcpMeterConfig, timebase: TimeBase) -> Result<Self, RemoteError> {
        let peer = config
            .addr
            .to_socket_addrs()
            .map_err(|_| RemoteError::Resolve(config.addr.clone()))?
            .next()
            .ok_or_else(|| RemoteError::Resolve(config.addr.clone()))?;

        let stream = TcpStream::connect_timeout(&peer, config.connect_timeout).map_err(|source| {
            RemoteError::Connect {
                addr: config.addr.clone(),
                source,
            }
        })?;
        stream.set_read_timeout(Some(config.read_timeout.max(MIN_READ_TIMEOUT)))?;
        stream.set_nodelay(true)?;

        info!(addr = %peer, "Connected to remote meter");
        REMOTE_CONNECTED.set(1.0);
        Ok(Self {
            stream,
            peer,
            recv_buf: Vec::new(),
            timebase,
            closed: false,
        })
    }

    /// Pop one complete line from the receive buffer.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.recv_buf.iter().position(|b| *b == b'\n')?;
        Some(self.recv_buf.drain(..=pos).collect())
    }

    fn decode(&self, line: &[u8]) -> Result<Option<Sample>, DeviceError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| DeviceError::Malformed(format!("invalid utf-8: {e}")))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        MeterMessage::parse(trimmed)?.into_reading(&self.timebase)
    }
}

impl Device for TcpMeter {
    fn read(&mut self) -> Result<Option<Sample>, DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        if let Some(line) = self.next_line() {
            return self.decode(&line);
        }

        let mut temp = [0u8; 1024];
        match self.stream.read(&mut temp) {
            Ok(0) => {
                warn!(addr = %self.peer, "Remote meter disconnected");
                REMOTE_CONNECTED.set(0.0);
                return Err(DeviceError::Disconnected);
            }
            Ok(n) => self.recv_buf.extend_from_slice(&temp[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(None),
            Err(err) => return Err(DeviceError::Io(err)),
        }

        match self.next_line() {
            Some(line) => self.decode(&line),
            None if self.recv_buf.len() > MAX_PENDING_BYTES => {
                let dropped = self.recv_buf.len();
                self.recv_buf.clear();
                Err(DeviceError::Malformed(format!(
                    "discarded {dropped} bytes without a line break"
                )))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::AlreadyClosed);
        }
        self.closed = true;
        REMOTE_CONNECTED.set(0.0);
        debug!(addr = %self.peer, "Closing remote meter connection");
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(DeviceError::Io(err)),
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}
