//! Command/response engine for stream links.
//!
//! A command is confirmed by whatever the reader delivers after the write:
//! the echo of the command, an ACK byte on network links, or the banner after
//! a `BREAK`. Transport failures and timeouts are logged and reported as
//! `false`.

use super::{Link, lock};
use crate::error::{Error, Result};
use crate::protocol::commands::{BREAK, command_line};
use crate::protocol::echo::{EchoRule, EchoVerdict, echo_matches, evaluate};
use crate::session::CommandPort;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use super::reader::ReaderCommand;

impl Link {
    /// Send `cmd` and wait up to `timeout` for the instrument to confirm it.
    ///
    /// A blank command is confirmed immediately. Only a link that was never
    /// opened yields `Err`.
    pub fn send_and_wait(&self, cmd: &str, timeout: Duration) -> Result<bool> {
        if cmd.trim().is_empty() {
            return Ok(true);
        }

        let responses = self.shared().text.subscribe();
        lock(&self.shared().buffer).mark();
        match self.write(&command_line(cmd)) {
            Ok(()) => {},
            Err(Error::NotOpen(name)) => return Err(Error::NotOpen(name)),
            Err(_) => return Ok(false),
        }
        debug!("Sent {cmd:?}, waiting up to {timeout:?}");

        let deadline = Instant::now() + timeout;
        let mut received = String::new();
        let mut verdict = EchoVerdict::NoData;
        while let Some(text) = responses.recv_until(deadline) {
            received.push_str(&text);
            verdict = evaluate(self.echo_rule(), cmd, &received);
            if verdict.is_accepted() {
                if self.echo_rule() == EchoRule::Ack {
                    debug!(
                        "{cmd:?} acknowledged (echo present: {})",
                        echo_matches(cmd, &received)
                    );
                } else {
                    debug!("{cmd:?} confirmed");
                }
                return Ok(true);
            }
        }

        let err = match verdict {
            EchoVerdict::NoData => Error::Timeout(format!("no response to {cmd:?} within {timeout:?}")),
            _ => Error::ProtocolMismatch {
                sent: cmd.to_string(),
                received,
            },
        };
        warn!("{err}");
        Ok(false)
    }

    /// Write `cmd` without waiting for a response.
    ///
    /// Returns `Ok(false)` if the write failed.
    pub fn send(&self, cmd: &str) -> Result<bool> {
        lock(&self.shared().buffer).mark();
        match self.write(&command_line(cmd)) {
            Ok(()) => Ok(true),
            Err(Error::NotOpen(name)) => Err(Error::NotOpen(name)),
            Err(_) => Ok(false),
        }
    }

    /// Interrupt the instrument.
    ///
    /// Channels with a break line get a hardware break first; if nothing
    /// arrives after it, or the channel has no break line, the textual
    /// `BREAK` command is sent and judged by the banner.
    pub fn send_break(&self) -> Result<bool> {
        let timeout = self.config().command_timeout;
        if !lock(&self.shared().channel).supports_break() {
            return self.send_and_wait(BREAK, timeout);
        }

        match self.hardware_break() {
            Ok(true) => Ok(true),
            Ok(false) => {
                debug!("No response to hardware break, sending {BREAK}");
                self.send_and_wait(BREAK, timeout)
            },
            Err(Error::NotOpen(name)) => Err(Error::NotOpen(name)),
            Err(e) => {
                warn!("Hardware break on {} failed: {e}", self.name());
                self.send_and_wait(BREAK, timeout)
            },
        }
    }

    /// Assert and release the break line; `true` if anything came back.
    fn hardware_break(&self) -> Result<bool> {
        let shared = self.shared();
        let wait_state = self.config().wait_state;
        let arrivals = shared.raw.subscribe();
        lock(&shared.buffer).mark();

        {
            let _guard = lock(&shared.write_lock);
            shared.in_break.store(true, Ordering::SeqCst);
            let asserted = lock(&shared.channel).set_break();
            if asserted.is_ok() {
                std::thread::sleep(wait_state);
            }
            let released = lock(&shared.channel).clear_break();
            shared.in_break.store(false, Ordering::SeqCst);
            asserted?;
            released?;
        }
        debug!("Break pulsed on {}", self.name());

        self.notify_reader(ReaderCommand::Wake);
        let heard = arrivals.recv_timeout(wait_state).is_some();
        Ok(heard || !lock(&shared.buffer).since_mark().is_empty())
    }

    /// Send `cmd` and gather response text until `terminator` shows up or
    /// `timeout` elapses.
    pub fn collect_until(&self, cmd: &str, terminator: &str, timeout: Duration) -> Result<String> {
        let responses = self.shared().text.subscribe();
        lock(&self.shared().buffer).mark();
        match self.write(&command_line(cmd)) {
            Ok(()) => {},
            Err(Error::NotOpen(name)) => return Err(Error::NotOpen(name)),
            Err(_) => return Ok(String::new()),
        }

        let deadline = Instant::now() + timeout;
        let mut text = String::new();
        while let Some(chunk) = responses.recv_until(deadline) {
            text.push_str(&chunk);
            if text.contains(terminator) {
                return Ok(text);
            }
        }
        debug!("{cmd:?}: {terminator:?} not seen within {timeout:?}");
        Ok(text)
    }
}

impl CommandPort for Link {
    fn send_and_wait(&mut self, cmd: &str, timeout: Duration) -> Result<bool> {
        Link::send_and_wait(self, cmd, timeout)
    }

    fn send_break(&mut self) -> Result<bool> {
        Link::send_break(self)
    }

    fn collect_until(&mut self, cmd: &str, terminator: &str, timeout: Duration) -> Result<String> {
        Link::collect_until(self, cmd, terminator, timeout)
    }

    fn command_timeout(&self) -> Duration {
        self.config().command_timeout
    }
}
