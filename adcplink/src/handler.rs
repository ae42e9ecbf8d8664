//! Telemetry consumers.
//!
//! What the instrument streams depends on the mode it is in: ADCP ensembles,
//! compass output or passthrough GPS sentences. A [`HandlerRouter`] holds one
//! [`DataHandler`] per [`ReceiveMode`] and hands every received chunk to the
//! handler of the current mode. Decoding itself happens downstream.

use std::collections::HashMap;

/// Kind of data the instrument is currently producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReceiveMode {
    /// Ensemble telemetry.
    #[default]
    Adcp,
    /// Compass calibration/diagnostic output.
    Compass,
    /// GPS passthrough.
    Gps,
}

/// Consumer of raw bytes received from the instrument.
///
/// Handlers run on the background reader thread and should return quickly.
pub trait DataHandler: Send {
    /// Called with each chunk of bytes as it arrives.
    fn on_data(&mut self, data: &[u8]);
}

impl<F> DataHandler for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_data(&mut self, data: &[u8]) {
        self(data);
    }
}

/// Dispatches received bytes to the handler of the current mode.
#[derive(Default)]
pub struct HandlerRouter {
    mode: ReceiveMode,
    handlers: HashMap<ReceiveMode, Box<dyn DataHandler>>,
}

impl HandlerRouter {
    /// Router with no handlers in ADCP mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode.
    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Switch mode; later data goes to that mode's handler.
    pub fn set_mode(&mut self, mode: ReceiveMode) {
        self.mode = mode;
    }

    /// Install (or replace) the handler for `mode`.
    pub fn set_handler(&mut self, mode: ReceiveMode, handler: Box<dyn DataHandler>) {
        self.handlers.insert(mode, handler);
    }

    /// Remove the handler for `mode`.
    pub fn remove_handler(&mut self, mode: ReceiveMode) -> Option<Box<dyn DataHandler>> {
        self.handlers.remove(&mode)
    }

    /// Hand `data` to the current mode's handler, if any.
    pub fn dispatch(&mut self, data: &[u8]) {
        if let Some(handler) = self.handlers.get_mut(&self.mode) {
            handler.on_data(data);
        }
    }
}
