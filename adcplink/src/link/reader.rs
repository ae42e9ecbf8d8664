//! Background reader thread.
//!
//! One thread per open link. Each tick it drains whatever the channel has
//! and hands it to [`Shared::deliver`]. A tick is skipped while the link is
//! paused, while a break is asserted and while a write is in flight.

use super::{Shared, lock};
use crate::error::Result;
use log::{debug, error, trace};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bytes requested from the channel per read call.
const READ_CHUNK: usize = 4096;

/// Upper bound on bytes collected in a single tick.
const MAX_PER_TICK: usize = 64 * 1024;

/// Observable reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReaderState {
    /// Running but not reading (paused).
    Idle,
    /// Polling the channel.
    Polling,
    /// Not running.
    Stopped,
}

/// Messages from the link to its reader.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReaderCommand {
    /// Change the polling interval.
    SetInterval(Duration),
    /// Poll now instead of waiting for the next tick.
    Wake,
    /// Exit the loop.
    Stop,
}

pub(crate) struct ReaderHandle {
    tx: Sender<ReaderCommand>,
    thread: JoinHandle<()>,
}

impl ReaderHandle {
    pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        shared.set_state(ReaderState::Polling);
        let thread = thread::Builder::new()
            .name("adcplink-reader".to_string())
            .spawn(move || run(&shared, &rx, interval))?;
        Ok(Self { tx, thread })
    }

    pub(crate) fn send(&self, command: ReaderCommand) {
        // A send error means the thread already exited.
        let _ = self.tx.send(command);
    }

    /// Stop the loop and wait for the thread to exit.
    pub(crate) fn stop(self) {
        self.send(ReaderCommand::Stop);
        if self.thread.join().is_err() {
            error!("Reader thread panicked");
        }
    }
}

fn run(shared: &Shared, rx: &Receiver<ReaderCommand>, mut interval: Duration) {
    debug!("Reader started, interval {interval:?}");
    loop {
        match rx.recv_timeout(interval) {
            Ok(ReaderCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(ReaderCommand::SetInterval(next)) => {
                debug!("Reader interval {interval:?} -> {next:?}");
                interval = next;
            },
            Ok(ReaderCommand::Wake) | Err(RecvTimeoutError::Timeout) => {},
        }
        tick(shared);
    }
    shared.set_state(ReaderState::Stopped);
    debug!("Reader stopped");
}

fn tick(shared: &Shared) {
    if shared.paused.load(Ordering::SeqCst) {
        shared.set_state(ReaderState::Idle);
        return;
    }
    shared.set_state(ReaderState::Polling);

    if shared.in_break.load(Ordering::SeqCst) || shared.sending.load(Ordering::SeqCst) {
        return;
    }

    let mut received = Vec::new();
    {
        let mut channel = lock(&shared.channel);
        if !channel.is_open() {
            return;
        }

        let mut buf = [0u8; READ_CHUNK];
        while received.len() < MAX_PER_TICK {
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) => {
                    error!("Read from {} failed: {e}", channel.name());
                    channel.close();
                    break;
                },
            }
        }
    }

    if !received.is_empty() {
        trace!("Reader delivered {} bytes", received.len());
        shared.deliver(&received);
    }
}
