//! Live monitor example
//!
//! Connects to the configured serial device, prints every committed
//! change for half a minute, then shuts down.
//!
//! Run with: cargo run --example watch

use libreshunt_core::prelude::*;
use libreshunt_core::protocol::list_ports;

fn main() -> Result<(), ProtocolError> {
    for port in list_ports() {
        eprintln!("[INFO] available port: {} {:?}", port.name, port.product);
    }

    let monitor = BatteryMonitor::instance();
    println!("device: {}", monitor.config().serial_device);

    monitor.register_change_listener(Box::new(|changes, ts| {
        for (name, change) in changes {
            match &change.old {
                Some(old) => println!("{}  {}: {} -> {}", ts.format("%H:%M:%S"), name, old, change.new),
                None => println!("{}  {}: {}", ts.format("%H:%M:%S"), name, change.new),
            }
        }
    }));

    monitor.start()?;
    monitor.ping()?;
    monitor.product_id()?;
    monitor.battery_capacity()?;

    std::thread::sleep(std::time::Duration::from_secs(30));
    monitor.stop();
    Ok(())
}
