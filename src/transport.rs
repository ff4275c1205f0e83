//! Byte stream transport
//!
//! The engine only needs blocking exact reads, writes and flush. Timeouts live entirely in
//! the transport; a read that comes back short is an error, never a partial result.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Parity, SerialConfig};

#[cfg(unix)]
type PortType = serialport::TTYPort;
#[cfg(windows)]
type PortType = serialport::COMPort;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Transport
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError>;

    /// Returns exactly `n` bytes or fails
    fn read(&mut self, n: usize) -> Result<Vec<u8>, TransportError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                         Serial Transport
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub struct SerialTransport {
    config: SerialConfig,
    port:   Option<PortType>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    fn port_mut(&mut self) -> Result<&mut PortType, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits(self.config.data_bits))
            .parity(parity(self.config.parity))
            .stop_bits(stop_bits(self.config.stop_bits))
            .timeout(self.config.timeout())
            .open_native()?;

        // Drop whatever the device sent before we were listening
        port.clear(ClearBuffer::All)?;

        info!("Connected to serial port {}", self.config.port);
        self.port = Some(port);
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let port = self.port_mut()?;
        let mut buffer = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            match port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,

                // Timeout > Short read
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,

                Err(e) => return Err(e.into()),
            }
        }

        if filled < n {
            return Err(TransportError::ShortRead {
                expected: n,
                received: filled,
            });
        }
        Ok(buffer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port_mut()?.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Write::flush(self.port_mut()?)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!("Disconnected from serial port {}", self.config.port);
        }
        Ok(())
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ———————————————————————————————————————————— Ports ——————————————————————————————————————————————

/// Returns `requested` if it is present, or the highest numbered port when `requested` is
/// empty. `None` when nothing matches yet.
pub fn find_port(requested: &str) -> Result<Option<String>, TransportError> {
    let ports = serialport::available_ports()?;
    debug!("Available ports: {:?}", ports.iter().map(|p| &p.port_name).collect::<Vec<_>>());

    if !requested.is_empty() {
        return Ok(ports.iter().any(|p| p.port_name == requested).then(|| requested.to_string()));
    }

    // Get highest port
    Ok(ports
        .iter()
        .max_by_key(|p| p.port_name.char_indices().last().unwrap_or((0, '0')).1)
        .map(|p| p.port_name.clone()))
}

/// Polls `find_port` once per `interval`, up to `attempts` times
pub fn wait_for_port(requested: &str, attempts: u32, interval: Duration) -> Result<String, TransportError> {
    for attempt in 1..=attempts {
        if let Some(name) = find_port(requested)? {
            return Ok(name);
        }
        debug!("Port not found, attempt {attempt}/{attempts}");
        std::thread::sleep(interval);
    }

    Err(TransportError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("serial port '{requested}' not found"),
    )))
}
