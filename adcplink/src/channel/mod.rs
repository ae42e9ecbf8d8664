//! Byte-level transport abstraction.
//!
//! Every transport the instrument can be reached over is wrapped in a
//! [`Channel`]. The command and download engines only ever see this trait:
//!
//! ```text
//! +--------------------------------------------------+
//! |        Command / response, bulk download         |
//! +-------------------------+------------------------+
//!                           |
//!                           v
//! +-------------------------+------------------------+
//! |                  Channel trait                   |
//! +--------+----------+----------+----------+--------+
//!          |          |          |          |
//!          v          v          v          v
//!      SerialChannel TcpChannel UdpChannel PingChannel
//!       (serialport) (std::net) (std::net) (socket2, ICMP)
//! ```
//!
//! Reads are best effort and never block for long: a read returns whatever
//! is available right now, or 0. Polling cadence belongs to the background
//! reader, not to the channel.
//!
//! ## Example
//!
//! ```rust,no_run
//! use adcplink::channel::{Channel, TcpChannel};
//!
//! fn example() -> adcplink::Result<()> {
//!     let mut channel = TcpChannel::new("192.168.1.130", 55056);
//!     channel.open()?;
//!     channel.write(b"BREAK\r")?;
//!
//!     let mut buf = [0u8; 512];
//!     let n = channel.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!     Ok(())
//! }
//! ```

pub mod loopback;
pub mod ping;
#[cfg(feature = "native")]
pub mod serial;
pub mod tcp;
pub mod udp;

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::commands::{NETWORK_BUFFER_CAPACITY, SERIAL_BUFFER_CAPACITY};
use crate::protocol::echo::EchoRule;

pub use loopback::{LoopbackChannel, LoopbackHandle};
pub use ping::{PingChannel, PingConfig, PingReply};
#[cfg(feature = "native")]
pub use serial::{SerialChannel, list_ports};
pub use tcp::TcpChannel;
pub use udp::UdpChannel;

/// Transport family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChannelKind {
    /// RS-232/RS-485 serial line.
    Serial,
    /// Raw TCP socket.
    Tcp,
    /// UDP socket.
    Udp,
    /// Commands and data inside ICMP echo payloads.
    Ping,
    /// In-process simulated instrument.
    Loopback,
}

impl ChannelKind {
    /// How this transport confirms commands.
    pub fn default_echo_rule(self) -> EchoRule {
        match self {
            Self::Tcp | Self::Udp => EchoRule::Ack,
            Self::Serial | Self::Ping | Self::Loopback => EchoRule::Echo,
        }
    }

    /// Receive buffer capacity used for this transport.
    pub fn default_buffer_capacity(self) -> usize {
        match self {
            Self::Serial | Self::Loopback => SERIAL_BUFFER_CAPACITY,
            Self::Tcp | Self::Udp | Self::Ping => NETWORK_BUFFER_CAPACITY,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Ping => "ping",
            Self::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

/// A byte transport to the instrument.
pub trait Channel: Send {
    /// Open the underlying handle. Opening an open channel is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Release the underlying handle.
    fn close(&mut self);

    /// Whether the handle is currently usable.
    fn is_open(&self) -> bool;

    /// Copy whatever is available into `buf` without waiting for more.
    ///
    /// Returns 0 when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Human readable endpoint name (port path or `host:port`).
    fn name(&self) -> &str;

    /// Transport family.
    fn kind(&self) -> ChannelKind;

    /// Whether the transport has a hardware break line.
    fn supports_break(&self) -> bool {
        false
    }

    /// Assert the break condition.
    fn set_break(&mut self) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} channel has no break line",
            self.kind()
        )))
    }

    /// Release the break condition.
    fn clear_break(&mut self) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} channel has no break line",
            self.kind()
        )))
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> ChannelKind {
        (**self).kind()
    }

    fn supports_break(&self) -> bool {
        (**self).supports_break()
    }

    fn set_break(&mut self) -> Result<()> {
        (**self).set_break()
    }

    fn clear_break(&mut self) -> Result<()> {
        (**self).clear_break()
    }
}

/// Serial port configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for blocking writes.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Whether an I/O error just means "nothing to read right now".
pub(crate) fn is_idle_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 921600).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_network_bindings_confirm_with_ack() {
        assert_eq!(ChannelKind::Tcp.default_echo_rule(), EchoRule::Ack);
        assert_eq!(ChannelKind::Udp.default_echo_rule(), EchoRule::Ack);
        assert_eq!(ChannelKind::Serial.default_echo_rule(), EchoRule::Echo);
    }

    #[test]
    fn test_buffer_capacity_per_binding() {
        assert_eq!(ChannelKind::Serial.default_buffer_capacity(), 16_000);
        assert_eq!(ChannelKind::Tcp.default_buffer_capacity(), 5_000);
    }
}
