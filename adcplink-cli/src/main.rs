//! adcplink CLI - Command-line tool for talking to ADCP instruments.
//!
//! ## Features
//!
//! - Send commands and confirm their echo or ACK
//! - Break, start/stop pinging, set the clock, list stored files
//! - Download files stored on the instrument with progress
//! - Live text monitor
//! - Serial, TCP, UDP and ICMP-ping transports
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::completions::cmd_completions;
use commands::download::cmd_download;
use commands::instrument::{InstrumentCommand, cmd_instrument};
use commands::monitor::cmd_monitor;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// adcplink - Talk to ADCP instruments over serial, TCP, UDP or ICMP.
///
/// Environment variables:
///   ADCPLINK_TRANSPORT  - Transport (serial, tcp, udp, ping)
///   ADCPLINK_PORT       - Serial port
///   ADCPLINK_BAUD       - Baud rate (default: 115200)
///   ADCPLINK_HOST       - Instrument address for network transports
///   ADCPLINK_NET_PORT   - TCP/UDP port (default: 55056)
#[derive(Parser)]
#[command(name = "adcplink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Transport used to reach the instrument.
    #[arg(short, long, global = true, env = "ADCPLINK_TRANSPORT")]
    transport: Option<Transport>,

    /// Serial port to use (auto-detected if only one exists).
    #[arg(short, long, global = true, env = "ADCPLINK_PORT")]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long, global = true, env = "ADCPLINK_BAUD")]
    baud: Option<u32>,

    /// Instrument address for TCP, UDP and ping transports.
    #[arg(long, global = true, env = "ADCPLINK_HOST")]
    host: Option<String>,

    /// TCP or UDP port of the instrument.
    #[arg(long, global = true, env = "ADCPLINK_NET_PORT")]
    net_port: Option<u16>,

    /// Command timeout in milliseconds; also bounds the TCP connect.
    #[arg(long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Transport {
    /// Serial line (default).
    Serial,
    /// Raw TCP socket.
    Tcp,
    /// UDP socket.
    Udp,
    /// Commands carried in ICMP echo payloads (needs raw socket privileges).
    Ping,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Send a command and wait for the instrument to confirm it.
    Send {
        /// Command text, e.g. "CWPP 1".
        command: String,
    },

    /// Interrupt the instrument and wait for its banner.
    Break,

    /// Start pinging.
    Start,

    /// Stop pinging.
    Stop,

    /// Set the instrument clock to the current UTC time.
    SetTime,

    /// List the files stored on the instrument.
    Dir,

    /// Print everything the instrument sends until Ctrl-C.
    Monitor,

    /// Download a file stored on the instrument.
    Download {
        /// File name on the instrument, e.g. A0000001.ENS.
        file: String,

        /// Output path (defaults to the file name in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Restart the instrument's file listing before downloading.
        #[arg(long)]
        restart: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "adcplink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Ctrl-C stops downloads and the monitor at the next chunk or poll
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    adcplink::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        },
        Commands::Send { command } => {
            cmd_instrument(&cli, &config, &InstrumentCommand::Send(command.clone()))?;
        },
        Commands::Break => {
            cmd_instrument(&cli, &config, &InstrumentCommand::Break)?;
        },
        Commands::Start => {
            cmd_instrument(&cli, &config, &InstrumentCommand::Start)?;
        },
        Commands::Stop => {
            cmd_instrument(&cli, &config, &InstrumentCommand::Stop)?;
        },
        Commands::SetTime => {
            cmd_instrument(&cli, &config, &InstrumentCommand::SetTime)?;
        },
        Commands::Dir => {
            cmd_instrument(&cli, &config, &InstrumentCommand::Dir)?;
        },
        Commands::Monitor => {
            cmd_monitor(&cli, &config)?;
        },
        Commands::Download {
            file,
            output,
            restart,
        } => {
            cmd_download(&cli, &config, file, output.as_deref(), *restart)?;
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
        },
    }

    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = adcplink::list_ports()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_send() {
        let cli = Cli::try_parse_from([
            "adcplink",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "921600",
            "send",
            "CWPP 1",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(921_600));
        if let Commands::Send { command } = cli.command {
            assert_eq!(command, "CWPP 1");
        } else {
            panic!("Expected Send command");
        }
    }

    #[test]
    fn test_cli_parse_transport() {
        let cli = Cli::try_parse_from([
            "adcplink",
            "--transport",
            "tcp",
            "--host",
            "192.168.1.130",
            "--net-port",
            "55056",
            "break",
        ])
        .unwrap();
        assert_eq!(cli.transport, Some(Transport::Tcp));
        assert_eq!(cli.host.as_deref(), Some("192.168.1.130"));
        assert_eq!(cli.net_port, Some(55056));
        assert!(matches!(cli.command, Commands::Break));
    }

    #[test]
    fn test_cli_parse_invalid_transport() {
        let result = Cli::try_parse_from(["adcplink", "--transport", "carrier-pigeon", "break"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_download() {
        let cli = Cli::try_parse_from([
            "adcplink",
            "download",
            "A0000001.ENS",
            "-o",
            "out.ens",
            "--restart",
        ])
        .unwrap();
        if let Commands::Download {
            file,
            output,
            restart,
        } = cli.command
        {
            assert_eq!(file, "A0000001.ENS");
            assert_eq!(output, Some(PathBuf::from("out.ens")));
            assert!(restart);
        } else {
            panic!("Expected Download command");
        }
    }

    #[test]
    fn test_cli_parse_download_defaults() {
        let cli = Cli::try_parse_from(["adcplink", "download", "A0000001.ENS"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Download {
                output: None,
                restart: false,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["adcplink", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_simple_commands() {
        let cli = Cli::try_parse_from(["adcplink", "set-time"]).unwrap();
        assert!(matches!(cli.command, Commands::SetTime));
        let cli = Cli::try_parse_from(["adcplink", "dir"]).unwrap();
        assert!(matches!(cli.command, Commands::Dir));
        let cli = Cli::try_parse_from(["adcplink", "monitor"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor));
    }

    #[test]
    fn test_cli_verbose_count() {
        let cli = Cli::try_parse_from(["adcplink", "-vv", "break"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["adcplink", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_global_args_after_subcommand() {
        let cli = Cli::try_parse_from(["adcplink", "stop", "-p", "COM3", "-q"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert!(cli.quiet);
    }
}
