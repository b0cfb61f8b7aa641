//! Host serial port adapter.
//!
//! The driver only speaks [embedded_io]; this wraps a `serialport` handle so it can be used
//! directly. The port is closed when the link is dropped.

use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

use crate::config::SerialConfig;

/// An open serial port configured for the supply (8 data bits, no parity, 1 stop bit).
pub struct SerialLink(Box<dyn SerialPort>);

#[derive(Error, Debug)]
#[error(transparent)]
pub struct LinkError(#[from] std::io::Error);

/// Open and configure the port named in `config`.
pub fn open(config: &SerialConfig, timeout: Duration) -> Result<SerialLink, serialport::Error> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(timeout)
        .open()?;
    Ok(SerialLink(port))
}

impl SerialLink {
    pub fn name(&self) -> Option<String> {
        self.0.name()
    }
}

impl embedded_io::Error for LinkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        use std::io::ErrorKind as Io;

        match self.0.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::BrokenPipe => ErrorKind::BrokenPipe,
            Io::NotConnected => ErrorKind::NotConnected,
            Io::InvalidInput => ErrorKind::InvalidInput,
            Io::InvalidData => ErrorKind::InvalidData,
            Io::TimedOut | Io::WouldBlock => ErrorKind::TimedOut,
            Io::Interrupted => ErrorKind::Interrupted,
            Io::Unsupported => ErrorKind::Unsupported,
            Io::OutOfMemory => ErrorKind::OutOfMemory,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for SerialLink {
    type Error = LinkError;
}

impl embedded_io::Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(std::io::Read::read(&mut self.0, buf)?)
    }
}

impl embedded_io::Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(std::io::Write::write(&mut self.0, buf)?)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(std::io::Write::flush(&mut self.0)?)
    }
}
