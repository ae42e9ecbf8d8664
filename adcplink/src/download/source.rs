//! Chunk sources for the two transport families.

use super::{Chunk, ChunkSource};
use crate::bus::Subscription;
use crate::channel::{PingChannel, PingReply};
use crate::error::{Error, Result};
use crate::link::Link;
use crate::protocol::commands::{CLEAR, RESEND, RESTART, download_request};
use log::{debug, warn};
use std::time::Duration;

/// Chunks pulled over the ICMP channel, one echo exchange per chunk.
///
/// A blank poll asks for the next chunk. Replies addressed from another
/// responder and timeouts count as empty; a reply from the target that is
/// too short to hold a frame header is a bad chunk.
pub struct PingChunkSource<'a> {
    channel: &'a mut PingChannel,
    timeout: Duration,
}

impl<'a> PingChunkSource<'a> {
    /// Source using the channel's exchange timeout.
    pub fn new(channel: &'a mut PingChannel) -> Self {
        let timeout = channel.timeout();
        Self { channel, timeout }
    }

    /// Override the per-chunk timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn query(&mut self, command: &str) -> Result<PingReply> {
        settle_reply(command, self.channel.query(command, self.timeout))
    }

    fn answered(&mut self, command: &str) -> Result<bool> {
        Ok(is_answer(&self.query(command)?))
    }

    fn chunk(&mut self, command: &str) -> Result<Chunk> {
        Ok(reply_chunk(self.query(command)?))
    }
}

/// Transport errors count as no reply; only misuse is passed on.
fn settle_reply(command: &str, result: Result<PingReply>) -> Result<PingReply> {
    match result {
        Ok(reply) => Ok(reply),
        Err(Error::NotOpen(name)) => Err(Error::NotOpen(name)),
        Err(e) => {
            warn!("Exchange {command:?} failed: {e}");
            Ok(PingReply::NoData)
        },
    }
}

/// Any reply from the target acknowledges a control command.
fn is_answer(reply: &PingReply) -> bool {
    !matches!(reply, PingReply::NoData)
}

fn reply_chunk(reply: PingReply) -> Chunk {
    match reply {
        PingReply::Data(data) if data.is_empty() => Chunk::Empty,
        PingReply::Data(data) => Chunk::Data(data),
        PingReply::Truncated => Chunk::Bad,
        PingReply::NoData => Chunk::Empty,
    }
}

impl ChunkSource for PingChunkSource<'_> {
    fn clear(&mut self) -> Result<bool> {
        self.answered(CLEAR)
    }

    fn request_file(&mut self, file: &str) -> Result<bool> {
        self.answered(&download_request(file))
    }

    fn next_chunk(&mut self) -> Result<Chunk> {
        self.chunk("")
    }

    fn resend(&mut self) -> Result<Chunk> {
        self.chunk(RESEND)
    }

    fn restart(&mut self) -> Result<bool> {
        self.answered(RESTART)
    }
}

/// Chunks streamed over a serial or network link.
///
/// While the download runs the reader polls at the download interval and
/// everything it delivers in one interval is one chunk. Streams have no
/// way to ask for a chunk again, so a resend just waits for the next one.
pub struct LinkChunkSource<'a> {
    link: &'a Link,
    arrivals: Option<Subscription<Vec<u8>>>,
    pending: Option<Vec<u8>>,
}

impl<'a> LinkChunkSource<'a> {
    /// Source reading from `link`.
    pub fn new(link: &'a Link) -> Self {
        Self {
            link,
            arrivals: None,
            pending: None,
        }
    }

    fn interval(&self) -> Duration {
        self.link.config().download_wait_state
    }
}

impl ChunkSource for LinkChunkSource<'_> {
    fn begin(&mut self) -> Result<()> {
        self.link.set_poll_interval(self.interval());
        Ok(())
    }

    fn end(&mut self) {
        self.arrivals = None;
        self.pending = None;
        self.link.set_poll_interval(self.link.config().wait_state);
    }

    fn clear(&mut self) -> Result<bool> {
        self.link.send_and_wait(CLEAR, self.link.config().command_timeout)
    }

    fn request_file(&mut self, file: &str) -> Result<bool> {
        let request = download_request(file);
        let arrivals = self.link.subscribe_raw();
        if !self.link.send(&request)? {
            return Ok(false);
        }

        // The echo of the request comes first; anything after it is data.
        let deadline = std::time::Instant::now() + self.link.config().command_timeout;
        let mut head = Vec::new();
        while let Some(bytes) = arrivals.recv_until(deadline) {
            head.extend_from_slice(&bytes);
            if let Some(rest) = strip_echo(&head, request.as_bytes()) {
                debug!("{request:?} echoed, {} data bytes followed", rest.len());
                if !rest.is_empty() {
                    self.pending = Some(rest.to_vec());
                }
                self.arrivals = Some(arrivals);
                return Ok(true);
            }
        }
        warn!("{request:?} was not echoed");
        Ok(false)
    }

    fn next_chunk(&mut self) -> Result<Chunk> {
        if let Some(data) = self.pending.take() {
            return Ok(Chunk::Data(data));
        }
        let interval = self.interval();
        let Some(ref arrivals) = self.arrivals else {
            return Ok(Chunk::Empty);
        };

        match arrivals.recv_timeout(interval) {
            Some(mut data) => {
                for more in arrivals.drain() {
                    data.extend_from_slice(&more);
                }
                Ok(Chunk::Data(data))
            },
            None => Ok(Chunk::Empty),
        }
    }

    fn resend(&mut self) -> Result<Chunk> {
        self.next_chunk()
    }

    fn restart(&mut self) -> Result<bool> {
        self.link.send_and_wait(RESTART, self.link.config().command_timeout)
    }
}

/// Bytes following the echoed `request` line, once the echo is complete.
fn strip_echo<'b>(received: &'b [u8], request: &[u8]) -> Option<&'b [u8]> {
    let start = received
        .windows(request.len())
        .position(|w| w.eq_ignore_ascii_case(request))?;
    let mut end = start + request.len();
    // The echo ends with the line terminator; wait for it.
    if end >= received.len() {
        return None;
    }
    // Only the echo's own line ending; later CR/LF bytes are file data.
    if received[end] == b'\r' {
        end += 1;
    }
    if received.get(end) == Some(&b'\n') {
        end += 1;
    }
    Some(&received[end..])
}
