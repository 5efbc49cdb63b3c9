//! Serial port handling
//!
//! Low-level access to the monitor's serial link. The device talks
//! 19200 baud 8-N-1 regardless of model.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::{ProtocolError, BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid), usb.product),
            _ => (None, None, None),
        };
        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key so ttyACM* ports come first, then ttyUSB*, then the rest,
/// each group ordered numerically by suffix.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (0, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (1, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports with deterministic ordering.
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux: pick up tty devices the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open and configure the monitor link: 19200 baud, 8 data bits, no
/// parity, one stop bit, no flow control. A short read timeout keeps the
/// reader loop responsive; actual pacing uses `bytes_to_read` polling.
pub fn open_port(name: &str) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(name, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    // keep DTR asserted; some USB adapters drop the line otherwise
    if let Err(e) = port.write_data_terminal_ready(true) {
        eprintln!("[DEBUG] open_port: failed to set DTR high: {} (continuing)", e);
    }

    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    Ok(port)
}
