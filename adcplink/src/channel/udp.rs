//! UDP channel.

use crate::channel::{Channel, ChannelKind, is_idle_error};
use crate::error::{Error, Result};
use log::{debug, trace};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

const READ_POLL: Duration = Duration::from_millis(1);

/// UDP "connection" to an instrument.
///
/// The socket is bound to an ephemeral local port and connected to the
/// instrument address, so only datagrams from the instrument are received.
pub struct UdpChannel {
    host: String,
    port: u16,
    name: String,
    socket: Option<UdpSocket>,
    opened_once: bool,
}

impl UdpChannel {
    /// Create a closed channel for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format!("udp://{host}:{port}");
        Self {
            host,
            port,
            name,
            socket: None,
            opened_once: false,
        }
    }

    /// Local address the socket is bound to, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> Result<&UdpSocket> {
        match self.socket {
            Some(ref s) => Ok(s),
            None if self.opened_once => Err(Error::Connection(format!("{} is closed", self.name))),
            None => Err(Error::NotOpen(self.name.clone())),
        }
    }
}

impl Channel for UdpChannel {
    fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let remote = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Connection(format!("cannot resolve {}", self.name)))?;
        let local: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(local)
            .map_err(|e| Error::Connection(format!("bind failed: {e}")))?;
        socket
            .connect(remote)
            .map_err(|e| Error::Connection(format!("connect to {remote} failed: {e}")))?;
        socket.set_read_timeout(Some(READ_POLL))?;
        debug!("UDP socket {:?} -> {remote}", socket.local_addr().ok());

        self.socket = Some(socket);
        self.opened_once = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket()?.recv(buf) {
            Ok(n) => {
                trace!("udp read {n} bytes");
                Ok(n)
            },
            Err(e) if is_idle_error(&e) => Ok(0),
            // ICMP port unreachable from an earlier send; nothing to read.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                trace!("udp recv: {e}");
                Ok(0)
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let sent = self.socket()?.send(data)?;
        if sent != data.len() {
            return Err(Error::Connection(format!(
                "short datagram: {sent} of {} bytes",
                data.len()
            )));
        }
        trace!("udp wrote {sent} bytes");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Udp
    }
}
