//! In-process simulated instrument.
//!
//! A [`LoopbackChannel`] hands every written buffer to a responder closure and
//! makes the closure's reply readable. A [`LoopbackHandle`] shares the same
//! state so a test (or a simulator) can inject unsolicited telemetry, inspect
//! what was written and make the next read fail.

use crate::channel::{Channel, ChannelKind};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Maps the bytes written to the bytes the instrument sends back.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct Shared {
    inbox: Mutex<VecDeque<u8>>,
    written: Mutex<Vec<u8>>,
    fail_next_read: AtomicBool,
    breaks: Mutex<u32>,
}

/// Simulated channel driven by a responder closure.
pub struct LoopbackChannel {
    name: String,
    open: bool,
    opened_once: bool,
    responder: Responder,
    break_reply: Option<Vec<u8>>,
    shared: Arc<Shared>,
}

/// Shared view of a loopback channel's state.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackChannel {
    /// Channel whose replies come from `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            name: "loopback".to_string(),
            open: false,
            opened_once: false,
            responder: Box::new(responder),
            break_reply: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Instrument that echoes every command back verbatim.
    pub fn echoing() -> Self {
        Self::new(<[u8]>::to_vec)
    }

    /// Instrument that never answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Give the channel a hardware break line; releasing the break queues
    /// `reply` (an empty reply simulates a link that ignores breaks).
    #[must_use]
    pub fn with_break_reply(mut self, reply: impl Into<Vec<u8>>) -> Self {
        self.break_reply = Some(reply.into());
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Handle sharing this channel's state.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else if self.opened_once {
            Err(Error::Connection(format!("{} is closed", self.name)))
        } else {
            Err(Error::NotOpen(self.name.clone()))
        }
    }
}

impl LoopbackHandle {
    /// Queue unsolicited bytes, as if the instrument had streamed them.
    pub fn push(&self, bytes: &[u8]) {
        self.shared
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(bytes);
    }

    /// Everything written to the channel so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Written bytes as text.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// Make the next read return a connection error.
    pub fn fail_next_read(&self) {
        self.shared.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// Number of hardware breaks asserted.
    pub fn break_count(&self) -> u32 {
        *self
            .shared
            .breaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Channel for LoopbackChannel {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        self.opened_once = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if self.shared.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection("simulated read failure".into()));
        }

        let mut inbox = self
            .shared
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let n = buf.len().min(inbox.len());
        for (slot, byte) in buf.iter_mut().zip(inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.shared
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);

        let reply = (self.responder)(data);
        if !reply.is_empty() {
            self.shared
                .inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(reply);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Loopback
    }

    fn supports_break(&self) -> bool {
        self.break_reply.is_some()
    }

    fn set_break(&mut self) -> Result<()> {
        self.check_open()?;
        if self.break_reply.is_none() {
            return Err(Error::Unsupported("loopback without break line".into()));
        }
        *self
            .shared
            .breaks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn clear_break(&mut self) -> Result<()> {
        self.check_open()?;
        match self.break_reply {
            Some(ref reply) => {
                self.shared
                    .inbox
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(reply.iter().copied());
                Ok(())
            },
            None => Err(Error::Unsupported("loopback without break line".into())),
        }
    }
}
