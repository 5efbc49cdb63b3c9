//! Communication channel abstraction
//!
//! The engine writes commands and the reader loop pulls telemetry through
//! this trait, so tests can substitute an in-memory channel for the real
//! serial port.

use serialport::SerialPort;
use std::io::{self, Read, Write};

/// A byte channel to the monitor.
pub trait CommunicationChannel: Read + Write + Send {
    /// Number of bytes available without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Drop any unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Clone the channel; reader and writer halves share the port
    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>>;
}

/// Serial port wrapper implementing [`CommunicationChannel`].
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}
