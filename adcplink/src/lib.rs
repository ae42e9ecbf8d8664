//! # adcplink
//!
//! Communication layer for acoustic Doppler current profilers (ADCPs).
//!
//! This crate talks to the instrument over any of its transports and
//! provides:
//!
//! - Serial, TCP, UDP and ICMP-echo ("ping") channels behind one trait
//! - A background reader feeding a bounded receive buffer, event buses and
//!   per-mode telemetry handlers
//! - Command/response exchanges confirmed by echo, ACK byte or banner
//! - Hardware and textual break signalling
//! - Chunked bulk download of files stored on the instrument
//!
//! ## Supported Transports
//!
//! - **Serial** (feature `native`, default) via the `serialport` crate
//! - **TCP** and **UDP** via `std::net`
//! - **ICMP echo** via raw sockets (`socket2`), usually needing privileges
//! - **Loopback**, an in-process simulated instrument
//!
//! ## Features
//!
//! - `native` (default): Serial port support
//! - `serde`: Serialization support for configuration and report types
//!
//! ## Example
//!
//! ```rust,no_run
//! use adcplink::{Link, LinkConfig, SerialChannel};
//! use adcplink::download::{DownloadEngine, DownloadSession, LinkChunkSource};
//! use adcplink::session::CommandPort;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut link = Link::connect(SerialChannel::with_port("/dev/ttyUSB0", 115200), LinkConfig::default())?;
//!
//!     // Wake the instrument and stop it pinging
//!     if link.send_break()? {
//!         link.stop_pinging()?;
//!     }
//!
//!     // Download a file into memory
//!     let mut source = LinkChunkSource::new(&link);
//!     let outcome = DownloadEngine::new(&mut source).run(DownloadSession::new("A0000001.ENS", Vec::new()))?;
//!     println!("{} bytes, {:?}", outcome.sink.len(), outcome.report.status);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod buffer;
pub mod bus;
pub mod channel;
pub mod download;
pub mod error;
pub mod handler;
pub mod link;
pub mod protocol;
pub mod session;
pub mod text;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Downloads
/// observe it once per chunk, in addition to their own cancel token.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use channel::{SerialChannel, list_ports};
pub use {
    buffer::ReceiveBuffer,
    bus::{EventBus, Subscription, SubscriptionId},
    channel::{
        Channel, ChannelKind, LoopbackChannel, PingChannel, PingConfig, PortInfo, SerialConfig,
        TcpChannel, UdpChannel,
    },
    download::{
        CancelToken, Chunk, ChunkSource, DownloadConfig, DownloadEngine, DownloadEvent,
        DownloadOutcome, DownloadReport, DownloadSession, DownloadStatus, download_to_file,
    },
    error::{Error, Result},
    handler::{DataHandler, ReceiveMode},
    link::{Link, LinkConfig, ReaderState},
    protocol::{EchoRule, EchoVerdict, FrameDecode, PingFrame},
    session::CommandPort,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        // No checker is registered inside the library's own tests.
        assert!(!is_interrupted_requested());
    }
}
