//! Protocol errors

use thiserror::Error;

/// Errors that can occur during monitor communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Not connected to monitor")]
    NotConnected,

    #[error("Monitor already running")]
    AlreadyRunning,

    #[error("Command checksum mismatch: byte sum is {actual:#04x}, expected 0x55")]
    CommandChecksum { actual: u8 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unsupported value width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Invalid hex payload: {0}")]
    InvalidHex(String),

    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
