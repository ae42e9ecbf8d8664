//! Commands and data carried inside ICMP echo packets.
//!
//! Every exchange is one echo request carrying `RTIy<command>\r` followed by
//! one echo reply whose payload is a [`PingFrame`]. A blank command polls the
//! instrument for whatever it has buffered, which is how downloads pull
//! their chunks.
//!
//! Opening the channel needs a raw ICMP socket, which usually requires
//! elevated privileges (`CAP_NET_RAW` on Linux).

use crate::channel::{Channel, ChannelKind};
use crate::error::{Error, Result};
use crate::protocol::commands::{BREAK, COMMAND_TIMEOUT, PING_PREFIX, ping_payload};
use crate::protocol::echo::{EchoRule, EchoVerdict, evaluate};
use crate::protocol::icmp::{echo_request, parse_echo_reply};
use crate::protocol::ping_frame::{DEFAULT_PAYLOAD_CAPACITY, FrameDecode, HEADER_LEN, PingFrame};
use crate::session::CommandPort;
use log::{debug, trace, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::VecDeque;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

/// Room for the IP and ICMP headers in front of the frame.
const DATAGRAM_OVERHEAD: usize = 60 + 8;

/// Ping channel settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PingConfig {
    /// Instrument address.
    pub target: Ipv4Addr,
    /// Time to wait for each echo reply.
    pub timeout: Duration,
    /// Data bytes the instrument puts in one reply.
    pub payload_capacity: usize,
    /// Echo identifier; derived from the process id when unset.
    pub identifier: Option<u16>,
}

impl PingConfig {
    /// Settings for `target` with default timeout and capacity.
    pub fn new(target: Ipv4Addr) -> Self {
        Self {
            target,
            timeout: COMMAND_TIMEOUT,
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            identifier: None,
        }
    }

    /// Set the per-exchange timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Decoded reply to one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingReply {
    /// Frame data from the target.
    Data(Vec<u8>),
    /// The target answered with a carrier too short for a frame header.
    Truncated,
    /// No reply in time, or the reply came from someone else.
    NoData,
}

/// ICMP echo transport to one instrument.
pub struct PingChannel {
    config: PingConfig,
    name: String,
    socket: Option<Socket>,
    identifier: u16,
    sequence: u16,
    scratch: Vec<u8>,
    pending: VecDeque<u8>,
    opened_once: bool,
}

impl PingChannel {
    /// Create a closed channel.
    pub fn new(config: PingConfig) -> Self {
        let identifier = config
            .identifier
            .unwrap_or_else(|| u16::try_from(std::process::id() & 0xFFFF).unwrap_or_default());
        let name = format!("icmp://{}", config.target);
        Self {
            config,
            name,
            socket: None,
            identifier,
            sequence: 0,
            scratch: Vec::new(),
            pending: VecDeque::new(),
            opened_once: false,
        }
    }

    /// Instrument address.
    pub fn target(&self) -> Ipv4Addr {
        self.config.target
    }

    /// Per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Send `command` and return the raw carrier payload of the matching
    /// echo reply, if one arrives within `timeout`.
    pub fn exchange(&mut self, command: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.exchange_payload(&ping_payload(command), timeout)
    }

    /// Send `command` and decode the reply frame.
    pub fn query(&mut self, command: &str, timeout: Duration) -> Result<PingReply> {
        let Some(carrier) = self.exchange(command, timeout)? else {
            return Ok(PingReply::NoData);
        };
        Ok(self.decode_carrier(&carrier))
    }

    fn decode_carrier(&self, carrier: &[u8]) -> PingReply {
        match PingFrame::decode(carrier, self.config.target) {
            FrameDecode::Frame(frame) => {
                if frame.was_clamped() {
                    debug!(
                        "Frame declared {} bytes, {} present",
                        frame.declared_len,
                        frame.data.len()
                    );
                }
                PingReply::Data(frame.data.to_vec())
            },
            FrameDecode::WrongResponder => {
                debug!("Ignoring frame addressed to another responder");
                PingReply::NoData
            },
            FrameDecode::Truncated => PingReply::Truncated,
        }
    }

    fn exchange_payload(&mut self, payload: &[u8], timeout: Duration) -> Result<Option<Vec<u8>>> {
        let target = self.config.target;
        let identifier = self.identifier;
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;

        let socket = match self.socket {
            Some(ref mut s) => s,
            None if self.opened_once => {
                return Err(Error::Connection(format!("{} is closed", self.name)));
            },
            None => return Err(Error::NotOpen(self.name.clone())),
        };

        let packet = echo_request(identifier, sequence, payload);
        let addr = SockAddr::from(SocketAddrV4::new(target, 0));
        socket.send_to(&packet, &addr)?;
        trace!("icmp seq {sequence} sent {} bytes", payload.len());

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                trace!("icmp seq {sequence} timed out");
                return Ok(None);
            }
            socket.set_read_timeout(Some(deadline - now))?;

            let n = match socket.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };

            // The raw socket sees every ICMP packet addressed to this host.
            let Some(reply) = parse_echo_reply(&self.scratch[..n]) else {
                continue;
            };
            if reply.source != target || reply.identifier != identifier || reply.sequence != sequence {
                trace!(
                    "Skipping echo reply from {} id {} seq {}",
                    reply.source, reply.identifier, reply.sequence
                );
                continue;
            }
            return Ok(Some(reply.payload.to_vec()));
        }
    }
}

impl Channel for PingChannel {
    fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(|e| Error::Connection(format!("raw ICMP socket unavailable: {e}")))?;
        debug!("Opened raw ICMP socket for {}", self.config.target);

        self.scratch = vec![0u8; DATAGRAM_OVERHEAD + HEADER_LEN + self.config.payload_capacity];
        self.socket = Some(socket);
        self.opened_once = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            self.pending.clear();
            debug!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.socket.is_none() && !self.opened_once {
            return Err(Error::NotOpen(self.name.clone()));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    /// Perform one exchange with `data` as the command bytes and queue the
    /// reply data for [`read`](Channel::read).
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(PING_PREFIX.len() + data.len());
        payload.extend_from_slice(PING_PREFIX.as_bytes());
        payload.extend_from_slice(data);

        let timeout = self.config.timeout;
        if let Some(carrier) = self.exchange_payload(&payload, timeout)? {
            if let PingReply::Data(bytes) = self.decode_carrier(&carrier) {
                self.pending.extend(bytes);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Ping
    }
}

impl CommandPort for PingChannel {
    fn send_and_wait(&mut self, cmd: &str, timeout: Duration) -> Result<bool> {
        if cmd.trim().is_empty() {
            return Ok(true);
        }

        let reply = match self.query(cmd, timeout) {
            Ok(reply) => reply,
            Err(Error::NotOpen(name)) => return Err(Error::NotOpen(name)),
            Err(e) => {
                warn!("{cmd:?} over {}: {e}", self.name);
                return Ok(false);
            },
        };

        let received = match reply {
            PingReply::Data(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            PingReply::Truncated | PingReply::NoData => String::new(),
        };
        match evaluate(EchoRule::Echo, cmd, &received) {
            EchoVerdict::Accepted => Ok(true),
            EchoVerdict::NoData => {
                warn!("{}", Error::Timeout(format!("no reply to {cmd:?} within {timeout:?}")));
                Ok(false)
            },
            EchoVerdict::Mismatch => {
                let err = Error::ProtocolMismatch {
                    sent: cmd.to_string(),
                    received,
                };
                warn!("{err}");
                Ok(false)
            },
        }
    }

    fn send_break(&mut self) -> Result<bool> {
        let timeout = self.config.timeout;
        self.send_and_wait(BREAK, timeout)
    }

    fn collect_until(&mut self, cmd: &str, terminator: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let per_exchange = self.config.timeout.min(timeout);
        let mut text = String::new();
        let mut command = cmd;

        while Instant::now() < deadline {
            match self.query(command, per_exchange) {
                Ok(PingReply::Data(bytes)) => text.push_str(&String::from_utf8_lossy(&bytes)),
                Ok(PingReply::Truncated | PingReply::NoData) => {},
                Err(Error::NotOpen(name)) => return Err(Error::NotOpen(name)),
                Err(e) => {
                    warn!("{command:?} over {}: {e}", self.name);
                    break;
                },
            }
            if text.contains(terminator) {
                break;
            }
            // Subsequent exchanges poll for the rest of the response.
            command = "";
        }
        Ok(text)
    }

    fn command_timeout(&self) -> Duration {
        self.config.timeout
    }
}
