//! # LibreShunt Core Library
//!
//! Core functionality for LibreShunt, a host-side driver for shunt-based
//! battery monitors that report over a serial line.
//!
//! This library provides:
//! - The dual-protocol parser: periodic textual telemetry frames and the
//!   hexadecimal register protocol share one byte stream
//! - Checksum validation for both flows
//! - A three-index register cache with change detection and listener
//!   dispatch
//! - A prioritized command queue with compression, per-command retries
//!   and single-inflight request/response correlation
//! - Raw line recording for offline replay
//!
//! ## Example
//!
//! ```rust,ignore
//! use libreshunt_core::monitor::BatteryMonitor;
//!
//! let monitor = BatteryMonitor::instance();
//! monitor.register_listener("stateOfCharge", Box::new(|new, _old, _ts, _name| {
//!     println!("SOC: {}", new);
//! }))?;
//! monitor.start()?;
//! ```

pub mod config;
pub mod monitor;
pub mod protocol;
pub mod recorder;
pub mod registers;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::monitor::BatteryMonitor;
    pub use crate::protocol::{
        Command, CommandKind, EngineConfig, ProtocolEngine, ProtocolError, Response,
        ResponseState,
    };
    pub use crate::registers::{default_cache, Change, Descriptor, RegisterCache, Value};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
