//! Command implementations.
//!
//! Each subcommand is implemented in its own module. Resolving which
//! instrument to talk to, and opening it, is shared here.

pub(crate) mod completions;
pub(crate) mod download;
pub(crate) mod instrument;
pub(crate) mod monitor;

use adcplink::channel::Channel;
use adcplink::{
    CommandPort, Link, PingChannel, PingConfig, SerialChannel, SerialConfig, TcpChannel,
    UdpChannel,
};
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use console::style;
use log::debug;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::time::Duration;

use crate::config::{Config, DEFAULT_BAUD, DEFAULT_NET_PORT};
use crate::{Cli, Transport};

/// Where the instrument is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Serial { port: String, baud: u32 },
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Ping { host: String },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { port, baud } => write!(f, "{port} @ {baud} baud"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Udp { host, port } => write!(f, "udp://{host}:{port}"),
            Self::Ping { host } => write!(f, "icmp://{host}"),
        }
    }
}

impl Target {
    /// Pick the transport and endpoint from flags, environment and config.
    pub(crate) fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let host = cli.host.clone().or_else(|| config.connection.host.clone());
        let transport = match cli.transport {
            Some(t) => t,
            None => match config.connection.transport.as_deref() {
                Some(name) => Transport::from_str(name, true)
                    .map_err(|e| anyhow::anyhow!("Invalid transport in config: {e}"))?,
                None if host.is_some() => Transport::Tcp,
                None => Transport::Serial,
            },
        };
        debug!("Transport: {transport:?}");

        let net_port = cli
            .net_port
            .or(config.connection.net_port)
            .unwrap_or(DEFAULT_NET_PORT);
        let require_host = || {
            host.clone()
                .with_context(|| format!("--host is required for the {transport:?} transport"))
        };

        Ok(match transport {
            Transport::Serial => Self::Serial {
                port: serial_port(cli, config)?,
                baud: cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD),
            },
            Transport::Tcp => Self::Tcp {
                host: require_host()?,
                port: net_port,
            },
            Transport::Udp => Self::Udp {
                host: require_host()?,
                port: net_port,
            },
            Transport::Ping => Self::Ping {
                host: require_host()?,
            },
        })
    }
}

/// Serial port from flags/config, or the only port present.
fn serial_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = cli.port.clone().or_else(|| config.connection.serial.clone()) {
        return Ok(port);
    }

    let ports = adcplink::list_ports().context("Failed to enumerate serial ports")?;
    match ports.as_slice() {
        [] => bail!("No serial ports found (use --port or --host)"),
        [only] => {
            debug!("Auto-selected serial port {}", only.name);
            Ok(only.name.clone())
        },
        many => {
            let names: Vec<&str> = many.iter().map(|p| p.name.as_str()).collect();
            bail!(
                "Several serial ports found ({}); choose one with --port",
                names.join(", ")
            )
        },
    }
}

/// First IPv4 address of `host`.
fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    (host, 0)
        .to_socket_addrs()
        .with_context(|| format!("Cannot resolve {host}"))?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .with_context(|| format!("{host} has no IPv4 address"))
}

/// TCP channel; an explicit `--timeout` also bounds the connect.
fn tcp_channel(host: &str, port: u16, timeout_ms: Option<u64>) -> TcpChannel {
    let channel = TcpChannel::new(host, port);
    match timeout_ms {
        Some(ms) => channel.with_connect_timeout(Duration::from_millis(ms)),
        None => channel,
    }
}

/// An open connection to the instrument.
pub(crate) enum Instrument {
    /// Serial or network stream with a background reader.
    Stream(Link),
    /// ICMP echo exchanges, one request per reply.
    Ping(PingChannel),
}

impl Instrument {
    /// Open `target`.
    pub(crate) fn connect(target: &Target, cli: &Cli, config: &Config) -> Result<Self> {
        let link_config = config.link_config(cli.timeout);
        let context = || format!("Failed to connect to {target}");

        let instrument = match target {
            Target::Serial { port, baud } => {
                let channel = SerialChannel::new(SerialConfig::new(port.as_str(), *baud));
                Self::Stream(Link::connect(channel, link_config).with_context(context)?)
            },
            Target::Tcp { host, port } => {
                let channel = tcp_channel(host, *port, cli.timeout);
                Self::Stream(Link::connect(channel, link_config).with_context(context)?)
            },
            Target::Udp { host, port } => {
                let channel = UdpChannel::new(host.as_str(), *port);
                Self::Stream(Link::connect(channel, link_config).with_context(context)?)
            },
            Target::Ping { host } => {
                let ping = PingConfig::new(resolve_ipv4(host)?)
                    .with_timeout(config.command_timeout(cli.timeout));
                let mut channel = PingChannel::new(ping);
                channel.open().with_context(context)?;
                Self::Ping(channel)
            },
        };

        if !cli.quiet {
            eprintln!("{} Connected to {}", style("✓").green(), style(target).cyan());
        }
        Ok(instrument)
    }

    /// The command interface of either kind.
    pub(crate) fn port(&mut self) -> &mut dyn CommandPort {
        match self {
            Self::Stream(link) => link,
            Self::Ping(channel) => channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["adcplink"];
        argv.extend_from_slice(args);
        argv.push("break");
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_serial_from_flags() {
        let cli = parse(&["--port", "/dev/ttyS0", "--baud", "9600"]);
        let target = Target::resolve(&cli, &Config::default()).unwrap();
        assert_eq!(
            target,
            Target::Serial {
                port: "/dev/ttyS0".to_string(),
                baud: 9600
            }
        );
    }

    #[test]
    fn test_resolve_serial_from_config() {
        let mut config = Config::default();
        config.connection.serial = Some("COM4".to_string());
        config.connection.baud = Some(38_400);
        let cli = parse(&["--transport", "serial"]);
        let target = Target::resolve(&cli, &config).unwrap();
        assert_eq!(target.to_string(), "COM4 @ 38400 baud");
    }

    #[test]
    fn test_resolve_host_implies_tcp() {
        let mut config = Config::default();
        config.connection.host = Some("10.0.0.5".to_string());
        let cli = parse(&[]);
        let target = Target::resolve(&cli, &config).unwrap();
        assert_eq!(target.to_string(), "tcp://10.0.0.5:55056");
    }

    #[test]
    fn test_resolve_config_transport() {
        let mut config = Config::default();
        config.connection.transport = Some("UDP".to_string());
        config.connection.host = Some("10.0.0.5".to_string());
        config.connection.net_port = Some(9000);
        let cli = parse(&[]);
        let target = Target::resolve(&cli, &config).unwrap();
        assert_eq!(
            target,
            Target::Udp {
                host: "10.0.0.5".to_string(),
                port: 9000
            }
        );
    }

    #[test]
    fn test_resolve_network_without_host_fails() {
        let cli = parse(&["--transport", "ping"]);
        if cli.host.is_none() {
            assert!(Target::resolve(&cli, &Config::default()).is_err());
        }
    }

    #[test]
    fn test_tcp_channel_connect_timeout_follows_flag() {
        let channel = tcp_channel("10.0.0.5", 55056, Some(750));
        assert_eq!(channel.connect_timeout(), Duration::from_millis(750));

        let channel = tcp_channel("10.0.0.5", 55056, None);
        assert_eq!(channel.connect_timeout(), adcplink::channel::tcp::CONNECT_TIMEOUT);
    }

    #[test]
    fn test_resolve_ipv4_literal() {
        assert_eq!(
            resolve_ipv4("192.168.1.130").unwrap(),
            Ipv4Addr::new(192, 168, 1, 130)
        );
    }
}
