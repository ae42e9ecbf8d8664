//! Raw TCP channel.

use crate::channel::{Channel, ChannelKind, is_idle_error};
use crate::error::{Error, Result};
use log::{debug, trace};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Default time allowed for the TCP handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read timeout; keeps `read` effectively non-blocking.
const READ_POLL: Duration = Duration::from_millis(1);

/// Write timeout for a single command or poll.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP connection to an instrument (or a serial-to-Ethernet bridge).
pub struct TcpChannel {
    host: String,
    port: u16,
    name: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    opened_once: bool,
}

impl TcpChannel {
    /// Create a closed channel for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format!("{host}:{port}");
        Self {
            host,
            port,
            name,
            connect_timeout: CONNECT_TIMEOUT,
            stream: None,
            opened_once: false,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Time allowed for the TCP handshake.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Connection(format!("cannot resolve {}", self.name)))
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        match self.stream {
            Some(ref mut s) => Ok(s),
            None if self.opened_once => Err(Error::Connection(format!("{} is closed", self.name))),
            None => Err(Error::NotOpen(self.name.clone())),
        }
    }
}

impl Channel for TcpChannel {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.resolve()?;
        debug!("Connecting to {addr}");
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| Error::Connection(format!("connect to {addr} failed: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_POLL))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        self.stream = Some(stream);
        self.opened_once = true;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let name = self.name.clone();
        let stream = self.stream_mut()?;
        match stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(Error::Connection(format!("{name} closed by peer"))),
            Ok(n) => {
                trace!("tcp read {n} bytes");
                Ok(n)
            },
            Err(e) if is_idle_error(&e) => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data)?;
        stream.flush()?;
        trace!("tcp wrote {} bytes", data.len());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Tcp
    }
}
