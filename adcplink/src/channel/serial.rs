//! Serial channel using the `serialport` crate.

use {
    crate::{
        channel::{
            Channel, ChannelKind, DataBits, FlowControl, Parity, PortInfo, SerialConfig, StopBits,
            is_idle_error,
        },
        error::{Error, Result},
    },
    log::{debug, trace},
    std::io::{Read, Write},
};

/// Serial line to the instrument.
pub struct SerialChannel {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
    opened_once: bool,
}

impl SerialChannel {
    /// Create a closed channel for the given configuration.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            opened_once: false,
        }
    }

    /// Create a closed channel with default line settings.
    pub fn with_port(port_name: &str, baud_rate: u32) -> Self {
        Self::new(SerialConfig::new(port_name, baud_rate))
    }

    /// Line configuration.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        let name = &self.config.port_name;
        match self.port {
            Some(ref mut p) => Ok(p),
            None if self.opened_once => Err(Error::Connection(format!("{name} is closed"))),
            None => Err(Error::NotOpen(name.clone())),
        }
    }
}

impl Channel for SerialChannel {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        debug!(
            "Opening serial port {} at {} baud",
            self.config.port_name, self.config.baud_rate
        );
        let port = serialport::new(&self.config.port_name, self.config.baud_rate)
            .timeout(self.config.timeout)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .flow_control(self.config.flow_control.into())
            .open()?;

        self.port = Some(port);
        self.opened_once = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.config.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let port = self.port_mut()?;
        let available = usize::try_from(port.bytes_to_read()?).unwrap_or(usize::MAX);
        if available == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = available.min(buf.len());
        match Read::read(port, &mut buf[..want]) {
            Ok(n) => {
                trace!("serial read {n} bytes");
                Ok(n)
            },
            Err(e) if is_idle_error(&e) => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        trace!("serial wrote {} bytes", data.len());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.port_name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    fn supports_break(&self) -> bool {
        true
    }

    fn set_break(&mut self) -> Result<()> {
        trace!("Asserting break on {}", self.config.port_name);
        self.port_mut()?.set_break()?;
        Ok(())
    }

    fn clear_break(&mut self) -> Result<()> {
        trace!("Releasing break on {}", self.config.port_name);
        self.port_mut()?.clear_break()?;
        Ok(())
    }
}

/// List serial ports on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    Some(info.vid),
                    Some(info.pid),
                    info.manufacturer.clone(),
                    info.product.clone(),
                    info.serial_number.clone(),
                ),
                _ => (None, None, None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                manufacturer,
                product,
                serial_number,
            }
        })
        .collect())
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
