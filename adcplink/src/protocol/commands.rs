//! Reserved command strings and timing constants.
//!
//! The instrument accepts plain ASCII command lines terminated by a carriage
//! return. A handful of commands are reserved by the link layer itself; all
//! other command text is passed through untouched.

use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Soft reset / banner request.
pub const BREAK: &str = "BREAK";

/// Re-request the last download chunk.
pub const RESEND: &str = "resend";

/// Clear the instrument's transfer buffer.
pub const CLEAR: &str = "clear";

/// Reset the download index to the start of the file.
pub const RESTART: &str = "restart";

/// Stage a file for chunked download (`download <name>`).
pub const DOWNLOAD: &str = "download";

/// List the files stored on the instrument.
pub const DIRECTORY: &str = "DSDIR";

/// Literal text that ends a directory listing.
pub const DIRECTORY_TERMINATOR: &str = "Used Space:";

/// Start pinging (begin telemetry output).
pub const START_PINGING: &str = "START";

/// Stop pinging.
pub const STOP_PINGING: &str = "STOP";

/// Set the instrument clock.
pub const SET_TIME: &str = "STIME";

/// Banner text the instrument prints after a break.
pub const BANNER: &str = "Rowe Technologies Inc.";

/// Acknowledgement byte sent by network bindings.
pub const ACK: u8 = 0x06;

/// Command line terminator.
pub const TERMINATOR: char = '\r';

/// Prefix that marks a command inside an ICMP echo payload.
pub const PING_PREFIX: &str = "RTIy";

/// Default time to wait for a command echo.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default polling interval of the background reader, and the break settle time.
pub const WAIT_STATE: Duration = Duration::from_millis(250);

/// Polling interval used while a bulk download is running.
pub const DOWNLOAD_WAIT_STATE: Duration = Duration::from_millis(25);

/// Consecutive empty or bad chunks tolerated before a download ends.
pub const RETRY_BUDGET: u32 = 100;

/// Resend attempts for a single bad chunk.
pub const RESEND_CAP: u32 = 20;

/// Receive buffer capacity for serial links.
pub const SERIAL_BUFFER_CAPACITY: usize = 16_000;

/// Receive buffer capacity for network and ping links.
pub const NETWORK_BUFFER_CAPACITY: usize = 5_000;

/// Whether `cmd` is the reserved break command.
pub fn is_break(cmd: &str) -> bool {
    cmd.trim().eq_ignore_ascii_case(BREAK)
}

/// Frame a command for a stream transport.
pub fn command_line(cmd: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(cmd.len() + 1);
    line.extend_from_slice(cmd.as_bytes());
    line.push(TERMINATOR as u8);
    line
}

/// Frame a command for the ICMP transport: `RTIy<cmd>\r`.
///
/// An empty command is a valid "poll for buffered data" request.
pub fn ping_payload(cmd: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PING_PREFIX.len() + cmd.len() + 1);
    payload.extend_from_slice(PING_PREFIX.as_bytes());
    payload.extend_from_slice(cmd.as_bytes());
    payload.push(TERMINATOR as u8);
    payload
}

/// Build the `download <name>` request.
pub fn download_request(file: &str) -> String {
    format!("{DOWNLOAD} {file}")
}

/// Calendar time as understood by the `STIME` command (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrumentTime(DateTime<Utc>);

impl InstrumentTime {
    /// Current UTC wall clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Convert a `SystemTime`, clamped to the Unix epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        Self(DateTime::<Utc>::from(time.max(UNIX_EPOCH)))
    }

    /// Render the full `STIME yyyy/MM/dd,HH:mm:ss` command.
    pub fn command(&self) -> String {
        format!("{SET_TIME} {}", self.0.format("%Y/%m/%d,%H:%M:%S"))
    }
}

impl From<DateTime<Utc>> for InstrumentTime {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_payload_framing() {
        assert_eq!(ping_payload("BREAK"), b"RTIyBREAK\r".to_vec());
        assert_eq!(ping_payload(""), b"RTIy\r".to_vec());
    }

    #[test]
    fn test_command_line_appends_cr() {
        assert_eq!(command_line("START"), b"START\r".to_vec());
    }

    #[test]
    fn test_is_break_ignores_case_and_whitespace() {
        assert!(is_break("BREAK"));
        assert!(is_break(" break\r"));
        assert!(!is_break("BREAKER"));
    }

    #[test]
    fn test_instrument_time_epoch() {
        let t = InstrumentTime::from_system_time(UNIX_EPOCH);
        assert_eq!(t.command(), "STIME 1970/01/01,00:00:00");
    }

    #[test]
    fn test_instrument_time_leap_day() {
        // 2024-02-29 13:45:07 UTC
        let t = InstrumentTime::from_system_time(UNIX_EPOCH + Duration::from_secs(1_709_214_307));
        assert_eq!(t.command(), "STIME 2024/02/29,13:45:07");
    }

    #[test]
    fn test_instrument_time_clamps_before_epoch() {
        let t = InstrumentTime::from_system_time(UNIX_EPOCH - Duration::from_secs(3600));
        assert_eq!(t.command(), "STIME 1970/01/01,00:00:00");
    }

    #[test]
    fn test_download_request() {
        assert_eq!(download_request("A0000001.ENS"), "download A0000001.ENS");
    }
}
