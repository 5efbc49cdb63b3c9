//! Serial protocol communication
//!
//! Implements both data flows the monitor multiplexes onto one serial
//! line: the once-a-second textual telemetry frames and the hexadecimal
//! register protocol used for reads and writes.

pub mod checksum;
pub mod engine;
pub mod hex;
pub mod message;
pub mod queue;
pub mod serial;
pub mod stream;

mod error;

pub use engine::{EngineConfig, ProtocolEngine};
pub use error::ProtocolError;
pub use message::{Command, CommandKind, Message, Response, ResponseState};
pub use queue::{CommandQueue, InsertOutcome};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// The monitor link always runs 19200 baud 8-N-1
pub const BAUD_RATE: u32 = 19200;

/// Default command response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Backoff when a transmission is requested before the link is synchronized
pub const DEFER_INTERVAL_MS: u64 = 1000;

/// Backoff between port open attempts
pub const PORT_RETRY_MS: u64 = 1000;
