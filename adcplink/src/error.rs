//! Error types for adcplink.

use std::io;
use thiserror::Error;

/// Result type for adcplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for adcplink operations.
///
/// Transport failures are converted into these variants at the point of I/O.
/// The command and download engines log them and degrade to a `false` result
/// or a failed download; only misuse such as talking to a channel that was
/// never opened reaches the caller as an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (sockets, file sinks).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The channel could not be opened or failed while in use.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The channel was used before it was ever opened.
    #[error("Channel {0} is not open")]
    NotOpen(String),

    /// No matching response within the allowed time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A download chunk arrived garbled.
    #[error("Bad chunk: {0}")]
    BadChunk(String),

    /// The instrument answered, but not with the echo of what was sent.
    #[error("Protocol mismatch: sent {sent:?}, received {received:?}")]
    ProtocolMismatch {
        /// Command that was sent.
        sent: String,
        /// Text that came back instead.
        received: String,
    },

    /// Operation not supported by this channel.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether the error means the transport itself is unusable.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_shows_both_sides() {
        let err = Error::ProtocolMismatch {
            sent: "CWPP 1".into(),
            received: "ERR\r".into(),
        };
        assert_eq!(
            err.to_string(),
            "Protocol mismatch: sent \"CWPP 1\", received \"ERR\\r\""
        );
    }

    #[test]
    fn test_is_connection() {
        assert!(Error::Connection("refused".into()).is_connection());
        assert!(Error::Io(io::Error::other("reset")).is_connection());
        assert!(!Error::NotOpen("COM1".into()).is_connection());
        assert!(!Error::Timeout("quiet".into()).is_connection());
    }
}
