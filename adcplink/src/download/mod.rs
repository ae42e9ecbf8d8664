//! Bulk download of files stored on the instrument.
//!
//! ## Protocol Overview
//!
//! The instrument buffers exactly one outstanding chunk and never signals
//! end-of-file. The host drives everything:
//!
//! ```text
//! Idle -> Clearing -> Requesting -> Downloading -> Finalizing -> Idle
//!                                        |
//!                                        +-> Cancelled
//! ```
//!
//! - Clearing: `clear` until the instrument answers, pausing between tries.
//! - Requesting: `download <name>` once.
//! - Downloading: poll for chunks. Data resets the retry budget, an empty
//!   poll spends one unit of it, a garbled chunk is resent up to
//!   [`RESEND_CAP`] times before it counts as empty. The file is done when
//!   the budget runs out.
//! - Finalizing: flush the sink and publish the completion event.

pub mod source;

use crate::bus::{EventBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::commands::{RESEND_CAP, RETRY_BUDGET};
use log::{debug, info, trace, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use source::{LinkChunkSource, PingChunkSource};

/// One answer to a chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Chunk data.
    Data(Vec<u8>),
    /// Nothing available right now.
    Empty,
    /// A garbled chunk; the same chunk can be requested again.
    Bad,
}

/// Where chunks come from.
pub trait ChunkSource {
    /// Called once before clearing.
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the download ends, whatever the outcome.
    fn end(&mut self) {}

    /// Ask the instrument to drop any staged data; `true` if it answered.
    fn clear(&mut self) -> Result<bool>;

    /// Ask for `file`; `true` if the request was accepted.
    fn request_file(&mut self, file: &str) -> Result<bool>;

    /// Fetch the next chunk.
    fn next_chunk(&mut self) -> Result<Chunk>;

    /// Fetch the last chunk again.
    fn resend(&mut self) -> Result<Chunk>;

    /// Restart the transfer from the beginning of the file.
    fn restart(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// Download tunables.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownloadConfig {
    /// Consecutive empty chunks tolerated before the file counts as done.
    pub retry_budget: u32,
    /// Resends of a garbled chunk before it counts as empty.
    pub resend_cap: u32,
    /// Clear attempts before giving up.
    pub clear_attempts: u32,
    /// Pause between clear attempts.
    pub clear_retry_delay: Duration,
    /// Send `restart` after clearing.
    pub restart_before_download: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry_budget: RETRY_BUDGET,
            resend_cap: RESEND_CAP,
            clear_attempts: 10,
            clear_retry_delay: Duration::from_secs(1),
            restart_before_download: false,
        }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested here or through the global
    /// interrupt checker.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) || crate::is_interrupted_requested()
    }
}

/// Download state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DownloadState {
    /// Not running.
    Idle,
    /// Waiting for the instrument to drop staged data.
    Clearing,
    /// Requesting the file.
    Requesting,
    /// Pulling chunks.
    Downloading,
    /// Flushing the sink.
    Finalizing,
    /// Stopped by cancellation.
    Cancelled,
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DownloadStatus {
    /// The instrument ran out of data after sending at least one byte.
    Completed,
    /// Cancelled before the end.
    Cancelled,
    /// Nothing usable was downloaded.
    Failed(String),
}

/// Summary of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownloadReport {
    /// Requested file name.
    pub file: String,
    /// Bytes written to the sink.
    pub bytes: u64,
    /// Data chunks accepted.
    pub chunks: u64,
    /// Resend requests issued.
    pub resends: u64,
    /// Outcome.
    pub status: DownloadStatus,
}

impl DownloadReport {
    /// Whether the file was downloaded completely.
    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Completed
    }
}

/// Report plus the sink handed back to the caller.
#[derive(Debug)]
pub struct DownloadOutcome<W> {
    /// What happened.
    pub report: DownloadReport,
    /// The sink, flushed.
    pub sink: W,
}

/// Download notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// A chunk was written; `bytes` is the running total.
    Progress {
        /// File being downloaded.
        file: String,
        /// Bytes written so far.
        bytes: u64,
    },
    /// The download ended.
    Complete {
        /// File that was downloaded.
        file: String,
        /// Whether it completed.
        success: bool,
        /// Final status.
        status: DownloadStatus,
    },
}

/// One file download in progress.
pub struct DownloadSession<W: Write> {
    file: String,
    sink: W,
    cancel: CancelToken,
}

impl<W: Write> DownloadSession<W> {
    /// Download `file` into `sink`.
    pub fn new(file: impl Into<String>, sink: W) -> Self {
        Self {
            file: file.into(),
            sink,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` to stop the session from elsewhere.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// File name.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Token that cancels this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Drives a [`ChunkSource`] through the download state machine.
pub struct DownloadEngine<'a, S: ChunkSource + ?Sized> {
    source: &'a mut S,
    config: DownloadConfig,
    events: EventBus<DownloadEvent>,
    state: DownloadState,
}

/// Running totals of one session.
struct Totals {
    bytes: u64,
    chunks: u64,
    resends: u64,
}

impl<'a, S: ChunkSource + ?Sized> DownloadEngine<'a, S> {
    /// Engine with default settings.
    pub fn new(source: &'a mut S) -> Self {
        Self::with_config(source, DownloadConfig::default())
    }

    /// Engine with custom settings.
    pub fn with_config(source: &'a mut S, config: DownloadConfig) -> Self {
        Self {
            source,
            config,
            events: EventBus::new(),
            state: DownloadState::Idle,
        }
    }

    /// Publish events on `events` instead of a private bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus<DownloadEvent>) -> Self {
        self.events = events;
        self
    }

    /// Subscribe to progress and completion events.
    pub fn subscribe(&self) -> Subscription<DownloadEvent> {
        self.events.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Run `session` to the end.
    ///
    /// Transport trouble ends up in the report's status; only misuse (a
    /// source that was never opened) is returned as `Err`.
    pub fn run<W: Write>(&mut self, session: DownloadSession<W>) -> Result<DownloadOutcome<W>> {
        let DownloadSession {
            file,
            mut sink,
            cancel,
        } = session;
        info!("Downloading {file}");

        self.source.begin()?;
        let mut totals = Totals {
            bytes: 0,
            chunks: 0,
            resends: 0,
        };
        let result = self.transfer(&file, &mut sink, &cancel, &mut totals);
        self.source.end();

        let mut misuse = None;
        let mut status = match result {
            Ok(status) => status,
            Err(Error::NotOpen(name)) => {
                let status = DownloadStatus::Failed(format!("{name} is not open"));
                misuse = Some(Error::NotOpen(name));
                status
            },
            Err(e) => DownloadStatus::Failed(e.to_string()),
        };

        self.state = DownloadState::Finalizing;
        if let Err(e) = sink.flush() {
            warn!("Flushing {file} failed: {e}");
            status = DownloadStatus::Failed(format!("flush failed: {e}"));
        }

        let success = status == DownloadStatus::Completed;
        match status {
            DownloadStatus::Completed => info!("Downloaded {file}: {} bytes", totals.bytes),
            DownloadStatus::Cancelled => info!("Download of {file} cancelled after {} bytes", totals.bytes),
            DownloadStatus::Failed(ref reason) => warn!("Download of {file} failed: {reason}"),
        }
        self.events.publish(&DownloadEvent::Complete {
            file: file.clone(),
            success,
            status: status.clone(),
        });
        self.state = if status == DownloadStatus::Cancelled {
            DownloadState::Cancelled
        } else {
            DownloadState::Idle
        };
        if let Some(err) = misuse {
            return Err(err);
        }

        Ok(DownloadOutcome {
            report: DownloadReport {
                file,
                bytes: totals.bytes,
                chunks: totals.chunks,
                resends: totals.resends,
                status,
            },
            sink,
        })
    }

    fn transfer<W: Write>(
        &mut self,
        file: &str,
        sink: &mut W,
        cancel: &CancelToken,
        totals: &mut Totals,
    ) -> Result<DownloadStatus> {
        self.state = DownloadState::Clearing;
        if !self.clear(cancel)? {
            return Ok(if cancel.is_cancelled() {
                DownloadStatus::Cancelled
            } else {
                DownloadStatus::Failed("instrument did not acknowledge clear".into())
            });
        }

        if self.config.restart_before_download && !self.source.restart()? {
            warn!("Restart not acknowledged, continuing");
        }

        self.state = DownloadState::Requesting;
        if !self.source.request_file(file)? {
            return Ok(DownloadStatus::Failed(format!("request for {file} rejected")));
        }

        self.state = DownloadState::Downloading;
        let mut budget = self.config.retry_budget;
        loop {
            let chunk = self.fetch(totals)?;

            if cancel.is_cancelled() {
                debug!("Cancellation observed after {} chunks", totals.chunks);
                return Ok(DownloadStatus::Cancelled);
            }

            match chunk {
                Chunk::Data(data) => {
                    sink.write_all(&data)?;
                    totals.bytes += data.len() as u64;
                    totals.chunks += 1;
                    budget = self.config.retry_budget;
                    trace!("chunk {} ({} bytes)", totals.chunks, data.len());
                    self.events.publish(&DownloadEvent::Progress {
                        file: file.to_string(),
                        bytes: totals.bytes,
                    });
                },
                Chunk::Empty | Chunk::Bad => {
                    budget = budget.saturating_sub(1);
                    if budget == 0 {
                        break;
                    }
                },
            }
        }

        Ok(if totals.bytes > 0 {
            DownloadStatus::Completed
        } else {
            DownloadStatus::Failed(format!("no data received for {file}"))
        })
    }

    /// Clear the instrument's staging buffer, retrying with a pause.
    fn clear(&mut self, cancel: &CancelToken) -> Result<bool> {
        for attempt in 1..=self.config.clear_attempts {
            if self.source.clear()? {
                debug!("Clear acknowledged on attempt {attempt}");
                return Ok(true);
            }
            if cancel.is_cancelled() {
                return Ok(false);
            }
            warn!(
                "Clear not acknowledged (attempt {attempt}/{}), retrying",
                self.config.clear_attempts
            );
            std::thread::sleep(self.config.clear_retry_delay);
        }
        Ok(false)
    }

    /// Next chunk, resending a garbled one up to the cap.
    fn fetch(&mut self, totals: &mut Totals) -> Result<Chunk> {
        let mut chunk = self.request(false)?;
        let mut resends = 0;
        while chunk == Chunk::Bad && resends < self.config.resend_cap {
            resends += 1;
            totals.resends += 1;
            trace!("Resending bad chunk ({resends}/{})", self.config.resend_cap);
            chunk = self.request(true)?;
        }
        if chunk == Chunk::Bad {
            let err = Error::BadChunk(format!("still garbled after {resends} resends"));
            warn!("{err}");
            return Ok(Chunk::Empty);
        }
        Ok(chunk)
    }

    fn request(&mut self, resend: bool) -> Result<Chunk> {
        let result = if resend {
            self.source.resend()
        } else {
            self.source.next_chunk()
        };
        match result {
            Ok(chunk) => Ok(chunk),
            Err(Error::NotOpen(name)) => Err(Error::NotOpen(name)),
            Err(e) => {
                warn!("Chunk request failed: {e}");
                Ok(Chunk::Empty)
            },
        }
    }
}

/// Download `file` from `source` into a new file at `path`.
pub fn download_to_file<S: ChunkSource + ?Sized>(
    source: &mut S,
    file: &str,
    path: &Path,
    config: DownloadConfig,
    cancel: CancelToken,
) -> Result<DownloadReport> {
    let sink = BufWriter::new(File::create(path)?);
    let session = DownloadSession::new(file, sink).with_cancel(cancel);
    let outcome = DownloadEngine::with_config(source, config).run(session)?;
    Ok(outcome.report)
}
