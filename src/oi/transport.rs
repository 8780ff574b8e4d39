// Byte-stream transport for the OI serial link
//
// The protocol layer only needs four things from a port: write a frame, read
// with a bounded wait, bound that wait, and discard stale input.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DEFAULT_BAUDRATE, DEFAULT_READ_TIMEOUT};

pub trait Transport: Send {
    /// Write the whole frame and flush it to the wire
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read into `buffer`, returning 0 if nothing arrived within the read timeout
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any received but unread bytes
    fn flush_receive_buffer(&mut self) -> io::Result<()>;
}

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<Self, serialport::Error> {
        Self::open_with_baudrate(path, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(path: &str, baudrate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_READ_TIMEOUT)
            .open()?;

        info!("Opened serial port {} at {} baud", path, baudrate);
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        debug!("Serial read timeout set to {:?}", timeout);
        self.port.set_timeout(timeout).map_err(io::Error::from)
    }

    fn flush_receive_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}
