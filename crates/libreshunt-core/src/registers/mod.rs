//! Register model
//!
//! Descriptors for every register the monitor exposes, the three-index
//! cache that mirrors their values, and the static catalogue describing
//! the known device registers.

mod cache;
pub mod catalogue;

pub use cache::{Change, ChangeListListener, ListenerId, RegisterCache};
pub use catalogue::default_cache;

use chrono::{DateTime, Utc};

use crate::protocol::hex::parse_hex_int;
use crate::protocol::ProtocolError;

/// A mirrored register value.
///
/// Telemetry values are ASCII integers in device-native units or plain
/// tokens (`ON`, `OFF`, hex-prefixed strings); both forms are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    /// Parse a raw telemetry token: integer when possible, text otherwise.
    pub fn from_raw(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Int(_) => None,
        }
    }
}

/// Per-descriptor change listener.
///
/// Called with the new and previous display strings, the frame arrival
/// timestamp and the descriptor's display name.
pub type ValueListener = Box<dyn Fn(&str, Option<&str>, DateTime<Utc>, &str) + Send>;

/// Display formatter override; `None` uses scaled numeric formatting.
pub type Formatter = fn(&Value) -> String;

/// Describes one device register: addressing, scaling and presentation.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Display name, unique across the catalogue
    pub name: String,
    /// Token used in telemetry frames, when the register appears there
    pub telemetry_key: Option<String>,
    /// Register-protocol address, when the register is command-reachable
    pub address: Option<u16>,
    /// Native unit to display unit scale
    pub factor: f64,
    /// Decimal places for display
    pub precision: usize,
    /// Minimum display-unit change that notifies listeners
    pub delta: f64,
    pub units: String,
    pub short_descr: String,
    /// Wire width in bytes for hex payloads
    pub width: usize,
    pub signed: bool,
    pub formatter: Option<Formatter>,
}

impl Descriptor {
    pub fn numeric(
        name: &str,
        telemetry_key: Option<&str>,
        address: Option<u16>,
        factor: f64,
        precision: usize,
        delta: f64,
        units: &str,
        short_descr: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            telemetry_key: telemetry_key.map(str::to_string),
            address,
            factor,
            precision,
            delta,
            units: units.to_string(),
            short_descr: short_descr.to_string(),
            width: 2,
            signed: false,
            formatter: None,
        }
    }

    pub fn text(
        name: &str,
        telemetry_key: Option<&str>,
        address: Option<u16>,
        short_descr: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            telemetry_key: telemetry_key.map(str::to_string),
            address,
            factor: 1.0,
            precision: 0,
            delta: 0.0,
            units: String::new(),
            short_descr: short_descr.to_string(),
            width: 2,
            signed: false,
            formatter: None,
        }
    }

    /// Generic descriptor for telemetry keys missing from the catalogue.
    pub fn dynamic(key: &str) -> Self {
        Self::numeric(key, Some(key), None, 1.0, 0, 0.0, "", "dynamically registered")
    }

    pub fn with_width(mut self, width: usize, signed: bool) -> Self {
        self.width = width;
        self.signed = signed;
        self
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Convert a big-endian response payload into a cache value.
    pub fn from_hex_str(&self, hex: &str) -> Result<Value, ProtocolError> {
        Ok(Value::Int(parse_hex_int(hex, self.signed)?))
    }

    /// Render a value for listeners and logs.
    pub fn format(&self, value: &Value) -> String {
        if let Some(f) = self.formatter {
            return f(value);
        }
        match value {
            Value::Int(n) => {
                let scaled = *n as f64 * self.factor;
                if self.units.is_empty() {
                    format!("{:.*}", self.precision, scaled)
                } else {
                    format!("{:.*} {}", self.precision, scaled, self.units)
                }
            }
            Value::Text(s) => s.clone(),
        }
    }

    /// Whether swapping `old` for `new` is a notifiable change. Callers
    /// have already established that the two differ.
    pub fn should_notify(&self, old: Option<&Value>, new: &Value) -> bool {
        match (old, new) {
            (Some(Value::Int(o)), Value::Int(n)) => {
                ((*n - *o) as f64 * self.factor).abs() >= self.delta
            }
            // first observation, or a non-numeric value on either side
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::from_raw("24340"), Value::Int(24340));
        assert_eq!(Value::from_raw("-500"), Value::Int(-500));
        assert_eq!(Value::from_raw("ON"), Value::Text("ON".into()));
        assert_eq!(Value::from_raw("0x203"), Value::Text("0x203".into()));
    }

    #[test]
    fn test_numeric_format() {
        let d = Descriptor::numeric("voltage", Some("V"), None, 0.001, 2, 0.01, "V", "");
        assert_eq!(d.format(&Value::Int(24340)), "24.34 V");
    }

    #[test]
    fn test_delta_threshold() {
        let d = Descriptor::numeric("voltage", Some("V"), None, 0.001, 2, 0.01, "V", "");
        let old = Value::Int(24340);
        assert!(!d.should_notify(Some(&old), &Value::Int(24345)));
        assert!(d.should_notify(Some(&old), &Value::Int(24350)));
        assert!(d.should_notify(None, &Value::Int(24340)));
    }

    #[test]
    fn test_text_always_notifies() {
        let d = Descriptor::text("relayState", Some("Relay"), None, "");
        assert!(d.should_notify(
            Some(&Value::Text("OFF".into())),
            &Value::Text("ON".into())
        ));
    }

    #[test]
    fn test_from_hex_signed() {
        let d = Descriptor::numeric("current", Some("I"), None, 0.001, 2, 0.0, "A", "")
            .with_width(2, true);
        assert_eq!(d.from_hex_str("FE0C").unwrap(), Value::Int(-500));
    }
}
