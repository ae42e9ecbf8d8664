//! Text monitor: print instrument output until Ctrl-C.

use adcplink::channel::PingReply;
use adcplink::text::{Utf8Decoder, printable};
use anyhow::Result;
use console::style;
use log::warn;
use std::io::{self, Write as _};
use std::time::Duration;

use super::{Instrument, Target};
use crate::config::Config;
use crate::{Cli, was_interrupted};

/// How often the monitor checks for Ctrl-C while waiting for output.
const POLL: Duration = Duration::from_millis(100);

/// Run the monitor.
///
/// Status lines go to stderr; instrument output goes to stdout so it can be
/// piped or redirected.
pub(crate) fn cmd_monitor(cli: &Cli, config: &Config) -> Result<()> {
    let target = Target::resolve(cli, config)?;
    let mut instrument = Instrument::connect(&target, cli, config)?;

    if !cli.quiet {
        eprintln!("{}", style("Press Ctrl-C to exit").dim());
    }

    let mut stdout = io::stdout();
    match instrument {
        Instrument::Stream(ref link) => {
            let text = link.subscribe_text();
            while !was_interrupted() {
                if let Some(chunk) = text.recv_timeout(POLL) {
                    write!(stdout, "{}", printable(&chunk))?;
                    stdout.flush()?;
                }
            }
        },
        Instrument::Ping(ref mut channel) => {
            // No reader here: poll with blank exchanges.
            let mut decoder = Utf8Decoder::new();
            let timeout = config.command_timeout(cli.timeout);
            while !was_interrupted() {
                match channel.query("", timeout) {
                    Ok(PingReply::Data(data)) if !data.is_empty() => {
                        write!(stdout, "{}", printable(&decoder.decode(&data)))?;
                        stdout.flush()?;
                    },
                    Ok(PingReply::Truncated) => warn!("Truncated reply from {target}"),
                    Ok(_) => std::thread::sleep(POLL),
                    Err(e) => {
                        warn!("Poll failed: {e}");
                        std::thread::sleep(POLL);
                    },
                }
            }
        },
    }

    if !cli.quiet {
        eprintln!("\n{} Monitor closed", style("✓").green());
    }
    Ok(())
}
