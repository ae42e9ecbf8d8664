//! Composite instrument operations shared by every command transport.
//!
//! A [`CommandPort`] only has to provide the primitive exchange
//! (`send_and_wait`), the break signal and text collection. Start/stop
//! pinging and clock setting are layered on top as "best of two": a
//! command that is not confirmed is sent exactly once more before the
//! failure is reported.

use crate::error::Result;
use crate::protocol::commands::{
    DIRECTORY, DIRECTORY_TERMINATOR, InstrumentTime, START_PINGING, STOP_PINGING,
};
use log::{debug, warn};
use std::time::Duration;

/// Attempts made by the composite operations.
pub const COMPOSITE_ATTEMPTS: u32 = 2;

/// Something that can exchange commands with the instrument.
pub trait CommandPort {
    /// Send `cmd` and wait up to `timeout` for the instrument to confirm it.
    ///
    /// Returns `Ok(false)` on timeout, mismatch or transport failure. `Err`
    /// is reserved for misuse such as a port that was never opened.
    fn send_and_wait(&mut self, cmd: &str, timeout: Duration) -> Result<bool>;

    /// Interrupt the instrument and wait for its banner.
    fn send_break(&mut self) -> Result<bool>;

    /// Send `cmd` and collect response text until it contains `terminator`
    /// or `timeout` elapses. Whatever arrived is returned either way.
    fn collect_until(&mut self, cmd: &str, terminator: &str, timeout: Duration) -> Result<String>;

    /// Timeout used by the composite operations.
    fn command_timeout(&self) -> Duration;

    /// Start the instrument pinging.
    fn start_pinging(&mut self) -> Result<bool> {
        best_of_two(self, START_PINGING)
    }

    /// Stop the instrument pinging.
    fn stop_pinging(&mut self) -> Result<bool> {
        best_of_two(self, STOP_PINGING)
    }

    /// Set the instrument clock to the host's current UTC time.
    fn set_time(&mut self) -> Result<bool> {
        self.set_time_to(InstrumentTime::now())
    }

    /// Set the instrument clock.
    fn set_time_to(&mut self, time: InstrumentTime) -> Result<bool> {
        best_of_two(self, &time.command())
    }

    /// List the files stored on the instrument.
    ///
    /// Returns `None` when neither attempt produced a complete listing.
    fn directory_listing(&mut self, timeout: Duration) -> Result<Option<String>> {
        for attempt in 1..=COMPOSITE_ATTEMPTS {
            let text = self.collect_until(DIRECTORY, DIRECTORY_TERMINATOR, timeout)?;
            if text.contains(DIRECTORY_TERMINATOR) {
                return Ok(Some(text));
            }
            if attempt < COMPOSITE_ATTEMPTS {
                warn!("Directory listing incomplete ({} bytes), retrying", text.len());
            }
        }
        Ok(None)
    }
}

/// Send `cmd`, retrying exactly once if it is not confirmed.
pub fn best_of_two<P: CommandPort + ?Sized>(port: &mut P, cmd: &str) -> Result<bool> {
    let timeout = port.command_timeout();
    for attempt in 1..=COMPOSITE_ATTEMPTS {
        if port.send_and_wait(cmd, timeout)? {
            debug!("{cmd:?} confirmed on attempt {attempt}");
            return Ok(true);
        }
        if attempt < COMPOSITE_ATTEMPTS {
            warn!("{cmd:?} not confirmed, retrying");
        }
    }
    warn!("{cmd:?} failed after {COMPOSITE_ATTEMPTS} attempts");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;

    /// Port answering from a script of outcomes.
    struct ScriptedPort {
        outcomes: VecDeque<bool>,
        listings: VecDeque<String>,
        sent: Vec<String>,
    }

    impl ScriptedPort {
        fn new(outcomes: &[bool]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                listings: VecDeque::new(),
                sent: Vec::new(),
            }
        }
    }

    impl CommandPort for ScriptedPort {
        fn send_and_wait(&mut self, cmd: &str, _timeout: Duration) -> Result<bool> {
            self.sent.push(cmd.to_string());
            Ok(self.outcomes.pop_front().unwrap_or(false))
        }

        fn send_break(&mut self) -> Result<bool> {
            self.send_and_wait("BREAK", Duration::ZERO)
        }

        fn collect_until(&mut self, cmd: &str, _terminator: &str, _timeout: Duration) -> Result<String> {
            self.sent.push(cmd.to_string());
            Ok(self.listings.pop_front().unwrap_or_default())
        }

        fn command_timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[test]
    fn test_first_attempt_success_sends_once() {
        let mut port = ScriptedPort::new(&[true]);
        assert!(port.start_pinging().unwrap());
        assert_eq!(port.sent, vec!["START"]);
    }

    #[test]
    fn test_retries_exactly_once() {
        let mut port = ScriptedPort::new(&[false, true]);
        assert!(port.stop_pinging().unwrap());
        assert_eq!(port.sent, vec!["STOP", "STOP"]);

        let mut port = ScriptedPort::new(&[false, false, true]);
        assert!(!port.stop_pinging().unwrap());
        assert_eq!(port.sent.len(), 2);
    }

    #[test]
    fn test_set_time_sends_formatted_command() {
        let mut port = ScriptedPort::new(&[true]);
        let time = InstrumentTime::from(Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap());
        assert!(port.set_time_to(time).unwrap());
        assert_eq!(port.sent, vec!["STIME 2024/03/07,09:05:01"]);
    }

    #[test]
    fn test_directory_listing_retries_incomplete() {
        let mut port = ScriptedPort::new(&[]);
        port.listings.push_back("A0000001.ENS".to_string());
        port.listings
            .push_back("A0000001.ENS\r\nUsed Space: 12 MB".to_string());

        let listing = port.directory_listing(Duration::from_millis(10)).unwrap();
        assert!(listing.unwrap().contains("Used Space:"));
        assert_eq!(port.sent, vec!["DSDIR", "DSDIR"]);
    }

    #[test]
    fn test_directory_listing_gives_up() {
        let mut port = ScriptedPort::new(&[]);
        assert!(port.directory_listing(Duration::from_millis(10)).unwrap().is_none());
        assert_eq!(port.sent.len(), 2);
    }
}
