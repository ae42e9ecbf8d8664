//! A live connection to the instrument.
//!
//! A [`Link`] owns one [`Channel`] together with everything needed to talk
//! over it concurrently:
//!
//! - a background reader thread that polls the channel, appends to the
//!   [`ReceiveBuffer`], publishes raw bytes and decoded text on two
//!   [`EventBus`]es and feeds the data handler of the current
//!   [`ReceiveMode`];
//! - a foreground write path serialised by a write lock, during which the
//!   reader stays away from the channel;
//! - the command/response engine (`send_and_wait`, `send_break`,
//!   `collect_until`) in [`command`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use adcplink::channel::TcpChannel;
//! use adcplink::link::{Link, LinkConfig};
//! use adcplink::session::CommandPort;
//!
//! fn example() -> adcplink::Result<()> {
//!     let mut link = Link::connect(TcpChannel::new("192.168.1.130", 55056), LinkConfig::default())?;
//!     if link.send_break()? {
//!         link.start_pinging()?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod reader;

use crate::buffer::ReceiveBuffer;
use crate::bus::{EventBus, Subscription};
use crate::channel::{Channel, ChannelKind};
use crate::error::{Error, Result};
use crate::handler::{DataHandler, HandlerRouter, ReceiveMode};
use crate::protocol::commands::{COMMAND_TIMEOUT, DOWNLOAD_WAIT_STATE, WAIT_STATE};
use crate::protocol::echo::EchoRule;
use crate::text::Utf8Decoder;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use reader::ReaderState;
use reader::{ReaderCommand, ReaderHandle};

/// Tunables for a [`Link`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Reader polling interval, also the settle time around a break.
    pub wait_state: Duration,
    /// Reader polling interval while a download is running.
    pub download_wait_state: Duration,
    /// Timeout used by composite operations.
    pub command_timeout: Duration,
    /// Receive buffer size; the transport default when unset.
    pub buffer_capacity: Option<usize>,
    /// Confirmation rule; the transport default when unset.
    pub echo_rule: Option<EchoRule>,
    /// Copy written commands into the receive buffer.
    pub mirror_writes: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            wait_state: WAIT_STATE,
            download_wait_state: DOWNLOAD_WAIT_STATE,
            command_timeout: COMMAND_TIMEOUT,
            buffer_capacity: None,
            echo_rule: None,
            mirror_writes: true,
        }
    }
}

impl LinkConfig {
    /// Set the reader polling interval.
    #[must_use]
    pub fn with_wait_state(mut self, wait_state: Duration) -> Self {
        self.wait_state = wait_state;
        self
    }

    /// Set the composite operation timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Override the transport's confirmation rule.
    #[must_use]
    pub fn with_echo_rule(mut self, rule: EchoRule) -> Self {
        self.echo_rule = Some(rule);
        self
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the foreground and the reader thread.
pub(crate) struct Shared {
    pub(crate) channel: Mutex<Box<dyn Channel>>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) sending: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) in_break: AtomicBool,
    pub(crate) buffer: Mutex<ReceiveBuffer>,
    pub(crate) raw: EventBus<Vec<u8>>,
    pub(crate) text: EventBus<String>,
    pub(crate) router: Mutex<HandlerRouter>,
    pub(crate) decoder: Mutex<Utf8Decoder>,
    pub(crate) state: Mutex<ReaderState>,
}

impl Shared {
    /// Hand freshly read bytes to every consumer.
    pub(crate) fn deliver(&self, bytes: &[u8]) {
        lock(&self.buffer).append(bytes);
        self.raw.publish(&bytes.to_vec());

        let text = lock(&self.decoder).decode(bytes);
        if !text.is_empty() {
            self.text.publish(&text);
        }

        lock(&self.router).dispatch(bytes);
    }

    pub(crate) fn set_state(&self, state: ReaderState) {
        *lock(&self.state) = state;
    }
}

/// An instrument connection with a background reader.
pub struct Link {
    shared: Arc<Shared>,
    config: LinkConfig,
    name: String,
    kind: ChannelKind,
    echo_rule: EchoRule,
    reader: Option<ReaderHandle>,
}

impl Link {
    /// Wrap `channel` without opening it.
    pub fn new<C: Channel + 'static>(channel: C, config: LinkConfig) -> Self {
        let kind = channel.kind();
        let name = channel.name().to_string();
        let capacity = config
            .buffer_capacity
            .unwrap_or_else(|| kind.default_buffer_capacity());
        let echo_rule = config.echo_rule.unwrap_or_else(|| kind.default_echo_rule());

        let shared = Arc::new(Shared {
            channel: Mutex::new(Box::new(channel)),
            write_lock: Mutex::new(()),
            sending: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            in_break: AtomicBool::new(false),
            buffer: Mutex::new(ReceiveBuffer::new(capacity)),
            raw: EventBus::new(),
            text: EventBus::new(),
            router: Mutex::new(HandlerRouter::new()),
            decoder: Mutex::new(Utf8Decoder::new()),
            state: Mutex::new(ReaderState::Stopped),
        });

        Self {
            shared,
            config,
            name,
            kind,
            echo_rule,
            reader: None,
        }
    }

    /// Wrap and open `channel`.
    pub fn connect<C: Channel + 'static>(channel: C, config: LinkConfig) -> Result<Self> {
        let mut link = Self::new(channel, config);
        link.open()?;
        Ok(link)
    }

    /// Open the channel and start the background reader.
    ///
    /// Calling this on an open link is a no-op.
    pub fn open(&mut self) -> Result<()> {
        lock(&self.shared.channel).open()?;
        if self.reader.is_none() {
            self.reader = Some(ReaderHandle::spawn(
                Arc::clone(&self.shared),
                self.config.wait_state,
            )?);
        }
        info!("Opened {} link {}", self.kind, self.name);
        Ok(())
    }

    /// Stop the reader and close the channel.
    ///
    /// The reader performs no further reads once this returns.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        let mut channel = lock(&self.shared.channel);
        if channel.is_open() {
            channel.close();
            info!("Closed link {}", self.name);
        }
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        lock(&self.shared.channel).is_open()
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport family.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Confirmation rule in effect.
    pub fn echo_rule(&self) -> EchoRule {
        self.echo_rule
    }

    /// Link settings.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current reader state.
    pub fn reader_state(&self) -> ReaderState {
        *lock(&self.shared.state)
    }

    /// Change how often the reader polls.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.notify_reader(ReaderCommand::SetInterval(interval));
    }

    /// Suspend reading; writes still go through.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        debug!("Reader paused on {}", self.name);
    }

    /// Resume reading after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        debug!("Reader resumed on {}", self.name);
    }

    /// Whether reading is paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Current receive mode.
    pub fn mode(&self) -> ReceiveMode {
        lock(&self.shared.router).mode()
    }

    /// Route subsequent telemetry to the handler for `mode`.
    pub fn set_mode(&self, mode: ReceiveMode) {
        lock(&self.shared.router).set_mode(mode);
        debug!("Receive mode set to {mode:?}");
    }

    /// Install the telemetry handler for `mode`.
    pub fn set_handler<H: DataHandler + 'static>(&self, mode: ReceiveMode, handler: H) {
        lock(&self.shared.router).set_handler(mode, Box::new(handler));
    }

    /// Remove the telemetry handler for `mode`.
    pub fn remove_handler(&self, mode: ReceiveMode) {
        lock(&self.shared.router).remove_handler(mode);
    }

    /// Subscribe to raw bytes as the reader delivers them.
    pub fn subscribe_raw(&self) -> Subscription<Vec<u8>> {
        self.shared.raw.subscribe()
    }

    /// Subscribe to decoded text as the reader delivers it.
    pub fn subscribe_text(&self) -> Subscription<String> {
        self.shared.text.subscribe()
    }

    /// Buffered bytes as text.
    pub fn buffer_text(&self) -> String {
        lock(&self.shared.buffer).as_text()
    }

    /// Bytes received since the last command was sent.
    pub fn since_last_command(&self) -> Vec<u8> {
        lock(&self.shared.buffer).since_mark()
    }

    /// Take and clear the buffered bytes.
    pub fn take_buffer(&self) -> Vec<u8> {
        lock(&self.shared.buffer).take()
    }

    /// Discard buffered bytes.
    pub fn clear_buffer(&self) {
        lock(&self.shared.buffer).clear();
    }

    /// Write raw bytes under the write lock.
    ///
    /// The reader skips its poll while the write is in flight. Written bytes
    /// are mirrored into the receive buffer when configured.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let _guard = lock(&self.shared.write_lock);
        self.shared.sending.store(true, Ordering::SeqCst);
        let result = lock(&self.shared.channel).write(data);
        self.shared.sending.store(false, Ordering::SeqCst);

        if let Err(ref e) = result {
            if !matches!(e, Error::NotOpen(_)) {
                warn!("Write to {} failed: {e}", self.name);
            }
        } else if self.config.mirror_writes {
            lock(&self.shared.buffer).append(data);
        }
        result
    }

    fn notify_reader(&self, command: ReaderCommand) {
        if let Some(ref reader) = self.reader {
            reader.send(command);
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}
