//! One-shot instrument commands: send, break, start, stop, set-time, dir.

use adcplink::protocol::commands::DIRECTORY;
use anyhow::{Result, bail};
use console::style;
use log::debug;
use std::time::Duration;

use super::{Instrument, Target};
use crate::Cli;
use crate::config::Config;

/// Directory listings stream one line per file and take longer than a command echo.
const MIN_LISTING_TIMEOUT: Duration = Duration::from_secs(10);

/// A single command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InstrumentCommand {
    Send(String),
    Break,
    Start,
    Stop,
    SetTime,
    Dir,
}

impl InstrumentCommand {
    fn describe(&self) -> String {
        match self {
            Self::Send(cmd) => format!("{cmd:?}"),
            Self::Break => "Break".to_string(),
            Self::Start => "Start pinging".to_string(),
            Self::Stop => "Stop pinging".to_string(),
            Self::SetTime => "Set time".to_string(),
            Self::Dir => "Directory listing".to_string(),
        }
    }
}

/// Connect, run `command`, and report whether the instrument confirmed it.
pub(crate) fn cmd_instrument(cli: &Cli, config: &Config, command: &InstrumentCommand) -> Result<()> {
    let target = Target::resolve(cli, config)?;
    let mut instrument = Instrument::connect(&target, cli, config)?;
    let timeout = config.command_timeout(cli.timeout);
    let port = instrument.port();

    let confirmed = match command {
        InstrumentCommand::Send(cmd) => port.send_and_wait(cmd, timeout)?,
        InstrumentCommand::Break => port.send_break()?,
        InstrumentCommand::Start => port.start_pinging()?,
        InstrumentCommand::Stop => port.stop_pinging()?,
        InstrumentCommand::SetTime => port.set_time()?,
        InstrumentCommand::Dir => {
            match port.directory_listing(timeout.max(MIN_LISTING_TIMEOUT))? {
                Some(listing) => {
                    println!("{}", listing_body(&listing));
                    true
                },
                None => false,
            }
        },
    };

    if !confirmed {
        bail!(
            "{} was not confirmed by the instrument at {target}",
            command.describe()
        );
    }
    debug!("{} confirmed", command.describe());
    if !cli.quiet {
        eprintln!("{} {} confirmed", style("✓").green(), command.describe());
    }
    Ok(())
}

/// Listing text without the echoed command line.
fn listing_body(listing: &str) -> String {
    listing
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case(DIRECTORY))
        .collect::<Vec<_>>()
        .join("\n")
}
