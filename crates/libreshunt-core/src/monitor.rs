//! Public facade
//!
//! [`BatteryMonitor`] is the application-facing surface: lifecycle,
//! register reads and writes, the named convenience accessors and
//! listener registration. The process owns exactly one monitor; repeated
//! acquisition returns the same handle, and the handle exposes no way to
//! reconfigure a live engine.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::AppConfig;
use crate::protocol::{
    open_port, Command, CommunicationChannel, EngineConfig, ProtocolEngine, ProtocolError,
    SerialChannel, PORT_RETRY_MS,
};
use crate::recorder::RawRecorder;
use crate::registers::catalogue::{
    REG_CAPACITY, REG_CHARGED_DETECT_TIME, REG_CHARGED_VOLTAGE, REG_CHARGE_EFFICIENCY,
    REG_CURRENT_THRESHOLD, REG_PEUKERT, REG_RELAY_LOW_SOC, REG_RELAY_LOW_SOC_CLEAR,
    REG_RELAY_MODE, REG_RELAY_STATE, REG_SOC, REG_TAIL_CURRENT, REG_TTG_DELTA_T,
};
use crate::registers::{
    default_cache, ChangeListListener, ListenerId, Value, ValueListener,
};

static INSTANCE: OnceLock<BatteryMonitor> = OnceLock::new();

struct Inner {
    config: AppConfig,
    engine: Mutex<ProtocolEngine>,
    running: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the process-wide monitor driver.
pub struct BatteryMonitor {
    inner: Arc<Inner>,
}

fn lock(engine: &Mutex<ProtocolEngine>) -> MutexGuard<'_, ProtocolEngine> {
    match engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl BatteryMonitor {
    /// The process-wide instance, constructed on first use with the
    /// configuration found on disk.
    pub fn instance() -> &'static BatteryMonitor {
        INSTANCE.get_or_init(|| Self::build(AppConfig::load()))
    }

    /// The process-wide instance, constructed with the given configuration
    /// on first call. Later calls return the existing instance and ignore
    /// the argument.
    pub fn acquire(config: AppConfig) -> &'static BatteryMonitor {
        INSTANCE.get_or_init(|| Self::build(config))
    }

    fn build(config: AppConfig) -> Self {
        let engine_config = EngineConfig {
            compression: config.compression,
            response_timeout: Duration::from_millis(config.cmd_response_timeout_ms),
        };
        let engine = ProtocolEngine::new(default_cache(), engine_config);
        Self {
            inner: Arc::new(Inner {
                config,
                engine: Mutex::new(engine),
                running: AtomicBool::new(false),
                reader: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Open the serial port and run the reader loop on a background
    /// thread. Open failures are retried with a fixed backoff until the
    /// port appears or [`BatteryMonitor::stop`] is called.
    pub fn start(&self) -> Result<(), ProtocolError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyRunning);
        }
        let inner = self.inner.clone();
        let handle = match thread::Builder::new()
            .name("libreshunt-reader".to_string())
            .spawn(move || reader_loop(inner))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        *self.inner.reader.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the reader thread and release the port.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let handle = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                eprintln!("[WARN] monitor: reader thread panicked");
            }
        }
        lock(&self.inner.engine).detach_channel();
    }

    /// Restart the device. Bypasses the queue; the relay drops as a side
    /// effect.
    pub fn restart(&self) {
        lock(&self.inner.engine).write_restart();
    }

    fn enqueue(&self, cmd: Command, priority: Option<u8>, force: bool) {
        let priority = priority.unwrap_or(self.inner.config.default_priority);
        let retries = if force {
            u32::MAX
        } else {
            self.inner.config.default_max_retries
        };
        lock(&self.inner.engine).enqueue(cmd.with_priority(priority).with_max_retries(retries));
    }

    pub fn ping(&self) -> Result<(), ProtocolError> {
        self.enqueue(Command::ping()?, None, false);
        Ok(())
    }

    /// Query the application version; the result lands in the `version`
    /// descriptor and fires its listeners.
    pub fn app_version(&self) -> Result<(), ProtocolError> {
        self.enqueue(Command::app_version()?, None, false);
        Ok(())
    }

    /// Query the product id; the result lands in the `productId`
    /// descriptor and fires its listeners.
    pub fn product_id(&self) -> Result<(), ProtocolError> {
        self.enqueue(Command::product_id()?, None, false);
        Ok(())
    }

    /// Read a register. The value arrives through the register's
    /// listeners once the device answers.
    pub fn get(
        &self,
        address: u16,
        priority: Option<u8>,
        force: bool,
    ) -> Result<(), ProtocolError> {
        self.enqueue(Command::get(address)?, priority, force);
        Ok(())
    }

    /// Write a register in device-native units.
    pub fn set(
        &self,
        address: u16,
        value: i64,
        priority: Option<u8>,
        force: bool,
    ) -> Result<(), ProtocolError> {
        let width = {
            let engine = lock(&self.inner.engine);
            engine
                .cache()
                .descriptor_by_address(address)
                .ok_or_else(|| ProtocolError::UnknownRegister(format!("{:#06x}", address)))?
                .width
        };
        self.enqueue(Command::set(address, value, width)?, priority, force);
        Ok(())
    }

    /// Close (`true`) or open (`false`) the relay.
    pub fn set_relay(&self, on: bool) -> Result<(), ProtocolError> {
        self.set(REG_RELAY_STATE, on as i64, None, false)
    }

    /// Select the relay mode (0 default, 1 charge, 2 remote).
    pub fn set_relay_mode(
        &self,
        mode: u8,
        priority: Option<u8>,
        force: bool,
    ) -> Result<(), ProtocolError> {
        self.set(REG_RELAY_MODE, mode as i64, priority, force)
    }

    /// Synchronize the state of charge, in percent.
    pub fn set_state_of_charge(&self, percent: f64) -> Result<(), ProtocolError> {
        self.set(REG_SOC, (percent * 10.0).round() as i64, None, false)
    }

    fn set_scaled(&self, address: u16, display_value: f64) -> Result<(), ProtocolError> {
        let (width, factor) = {
            let engine = lock(&self.inner.engine);
            let desc = engine
                .cache()
                .descriptor_by_address(address)
                .ok_or_else(|| ProtocolError::UnknownRegister(format!("{:#06x}", address)))?;
            (desc.width, desc.factor)
        };
        let native = (display_value / factor).round() as i64;
        self.enqueue(Command::set(address, native, width)?, None, false);
        Ok(())
    }

    // named battery configuration accessors; getters request a readback,
    // setters take display units

    pub fn battery_capacity(&self) -> Result<(), ProtocolError> {
        self.get(REG_CAPACITY, None, false)
    }

    pub fn set_battery_capacity(&self, amp_hours: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_CAPACITY, amp_hours)
    }

    pub fn charged_voltage(&self) -> Result<(), ProtocolError> {
        self.get(REG_CHARGED_VOLTAGE, None, false)
    }

    pub fn set_charged_voltage(&self, volts: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_CHARGED_VOLTAGE, volts)
    }

    pub fn tail_current(&self) -> Result<(), ProtocolError> {
        self.get(REG_TAIL_CURRENT, None, false)
    }

    pub fn set_tail_current(&self, percent: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_TAIL_CURRENT, percent)
    }

    pub fn charged_detect_time(&self) -> Result<(), ProtocolError> {
        self.get(REG_CHARGED_DETECT_TIME, None, false)
    }

    pub fn set_charged_detect_time(&self, minutes: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_CHARGED_DETECT_TIME, minutes)
    }

    pub fn charge_efficiency(&self) -> Result<(), ProtocolError> {
        self.get(REG_CHARGE_EFFICIENCY, None, false)
    }

    pub fn set_charge_efficiency(&self, percent: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_CHARGE_EFFICIENCY, percent)
    }

    pub fn peukert_coefficient(&self) -> Result<(), ProtocolError> {
        self.get(REG_PEUKERT, None, false)
    }

    pub fn set_peukert_coefficient(&self, coefficient: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_PEUKERT, coefficient)
    }

    pub fn current_threshold(&self) -> Result<(), ProtocolError> {
        self.get(REG_CURRENT_THRESHOLD, None, false)
    }

    pub fn set_current_threshold(&self, amps: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_CURRENT_THRESHOLD, amps)
    }

    pub fn ttg_delta_t(&self) -> Result<(), ProtocolError> {
        self.get(REG_TTG_DELTA_T, None, false)
    }

    pub fn set_ttg_delta_t(&self, minutes: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_TTG_DELTA_T, minutes)
    }

    pub fn relay_low_soc(&self) -> Result<(), ProtocolError> {
        self.get(REG_RELAY_LOW_SOC, None, false)
    }

    pub fn set_relay_low_soc(&self, percent: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_RELAY_LOW_SOC, percent)
    }

    pub fn relay_low_soc_clear(&self) -> Result<(), ProtocolError> {
        self.get(REG_RELAY_LOW_SOC_CLEAR, None, false)
    }

    pub fn set_relay_low_soc_clear(&self, percent: f64) -> Result<(), ProtocolError> {
        self.set_scaled(REG_RELAY_LOW_SOC_CLEAR, percent)
    }

    /// Last committed value of a named register.
    pub fn value(&self, name: &str) -> Option<Value> {
        lock(&self.inner.engine).cache().value_by_name(name).cloned()
    }

    /// Subscribe to changes of one named register.
    pub fn register_listener(
        &self,
        name: &str,
        listener: ValueListener,
    ) -> Result<ListenerId, ProtocolError> {
        lock(&self.inner.engine).cache_mut().add_listener(name, listener)
    }

    pub fn deregister_listener(&self, name: &str, token: ListenerId) -> bool {
        lock(&self.inner.engine).cache_mut().remove_listener(name, token)
    }

    /// Subscribe to the aggregated per-frame change map (the `ChangeList`
    /// pseudo-property).
    pub fn register_change_listener(&self, listener: ChangeListListener) -> ListenerId {
        lock(&self.inner.engine).cache_mut().add_change_listener(listener)
    }

    pub fn deregister_change_listener(&self, token: ListenerId) -> bool {
        lock(&self.inner.engine).cache_mut().remove_change_listener(token)
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        lock(&self.inner.engine).cache().has_listeners(name)
    }
}

fn reader_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        let mut channel = match open_port(&inner.config.serial_device) {
            Ok(port) => SerialChannel::new(port),
            Err(e) => {
                eprintln!(
                    "[WARN] monitor: cannot open {}: {}, retrying",
                    inner.config.serial_device, e
                );
                thread::sleep(Duration::from_millis(PORT_RETRY_MS));
                continue;
            }
        };
        eprintln!("[INFO] monitor: opened {}", inner.config.serial_device);

        {
            let mut engine = lock(&inner.engine);
            match channel.try_clone() {
                Ok(writer) => engine.attach_channel(writer),
                Err(e) => {
                    eprintln!("[WARN] monitor: cannot clone port handle: {}", e);
                    thread::sleep(Duration::from_millis(PORT_RETRY_MS));
                    continue;
                }
            }
            if inner.config.recording {
                let mut recorder = RawRecorder::new(&inner.config.recording_path);
                match recorder.start() {
                    Ok(()) => engine.set_recorder(Some(recorder)),
                    Err(e) => eprintln!("[WARN] monitor: recording disabled: {}", e),
                }
            }
        }

        let mut buf = [0u8; 256];
        while inner.running.load(Ordering::SeqCst) {
            match channel.read(&mut buf) {
                Ok(0) => thread::sleep(Duration::from_millis(2)),
                Ok(n) => lock(&inner.engine).feed(&buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    eprintln!("[WARN] monitor: read failed: {}, reopening port", e);
                    break;
                }
            }
            lock(&inner.engine).poll();
        }
        lock(&inner.engine).detach_channel();
    }
}
