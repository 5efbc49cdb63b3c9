//! Command transmission, response correlation, timeouts and retries,
//! exercised against an in-memory channel.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use libreshunt_core::protocol::{
    Command, CommunicationChannel, EngineConfig, ProtocolEngine,
};
use libreshunt_core::registers::catalogue::{REG_RELAY_STATE, REG_SOC};
use libreshunt_core::registers::{default_cache, Value};

/// In-memory channel capturing everything the engine writes.
#[derive(Clone)]
struct MemoryChannel {
    written: Arc<Mutex<Vec<u8>>>,
}

impl MemoryChannel {
    fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written.lock().unwrap()).to_string()
    }

    fn count_of(&self, needle: &str) -> usize {
        self.written_string().matches(needle).count()
    }
}

impl Read for MemoryChannel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for MemoryChannel {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(0)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn CommunicationChannel>> {
        Ok(Box::new(self.clone()))
    }
}

fn frame_with_trailer(fields: &[(&str, &str)], trailer: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (key, value) in fields {
        bytes.extend_from_slice(key.as_bytes());
        bytes.push(b'\t');
        bytes.extend_from_slice(value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(b"Checksum\t");
    let sum = bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_add(b'\r')
        .wrapping_add(b'\n');
    bytes.push(0u8.wrapping_sub(sum));
    bytes.extend_from_slice(trailer.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    bytes
}

fn frame(fields: &[(&str, &str)]) -> Vec<u8> {
    frame_with_trailer(fields, "")
}

/// Synchronized engine with an attached memory channel.
fn engine_with_channel(timeout_ms: u64) -> (ProtocolEngine, MemoryChannel) {
    let channel = MemoryChannel::new();
    let mut engine = ProtocolEngine::new(
        default_cache(),
        EngineConfig {
            compression: true,
            response_timeout: Duration::from_millis(timeout_ms),
        },
    );
    engine.attach_channel(Box::new(channel.clone()));
    engine.feed(b"\r\n");
    engine.feed(&frame(&[("V", "24340")]));
    (engine, channel)
}

#[test]
fn test_get_response_correlates_and_commits() {
    let (mut engine, channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    assert_eq!(channel.count_of(":7FF0F0040\n"), 1);
    assert_eq!(engine.inflight_count(), 1);
    assert_eq!(engine.queue_len(), 1);

    // device answers behind the next frame's checksum byte: address
    // little-endian, value 876 (0x036C) little-endian
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":7FF0F006C03D1\n"));

    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.inflight_count(), 0);
    assert_eq!(
        engine.cache().value_by_name("stateOfCharge"),
        Some(&Value::Int(876))
    );
}

#[test]
fn test_single_inflight() {
    let (mut engine, channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    engine.enqueue(Command::get(0x1000).unwrap());
    // only the head is on the wire; the second command waits
    assert_eq!(channel.count_of(":7"), 1);
    assert_eq!(engine.inflight_count(), 1);
    assert_eq!(engine.queue_len(), 2);
}

#[test]
fn test_response_advances_to_next_command() {
    let (mut engine, channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    engine.enqueue(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":7FF0F006C03D1\n"));
    // head resolved, follow-up transmitted
    let set_wire = Command::set(REG_RELAY_STATE, 1, 1).unwrap().wire().to_string();
    assert_eq!(channel.count_of(&set_wire), 1);
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.inflight_count(), 1);
}

#[test]
fn test_timeout_retries_then_drops() {
    let (mut engine, channel) = engine_with_channel(25);
    engine.enqueue(Command::get(REG_SOC).unwrap().with_max_retries(2));
    // initial transmission plus two retries, then the command is dropped
    for expected in [1usize, 2, 3] {
        assert_eq!(channel.count_of(":7FF0F0040\n"), expected);
        thread::sleep(Duration::from_millis(40));
        engine.poll();
    }
    assert_eq!(channel.count_of(":7FF0F0040\n"), 3);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.inflight_count(), 0);
    assert!(engine.max_response_time() >= Duration::from_millis(75));
}

#[test]
fn test_exhaustion_sends_next_command() {
    let (mut engine, channel) = engine_with_channel(25);
    engine.enqueue(Command::get(REG_SOC).unwrap().with_max_retries(0));
    engine.enqueue(Command::get(0x1000).unwrap().with_max_retries(0));
    thread::sleep(Duration::from_millis(40));
    engine.poll();
    // head dropped without retries, next command went out
    let second_wire = Command::get(0x1000).unwrap().wire().to_string();
    assert_eq!(channel.count_of(&second_wire), 1);
    assert_eq!(engine.queue_len(), 1);
}

#[test]
fn test_device_error_state_retires_command() {
    let (mut engine, _channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    // state 0x01: unknown id
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":7FF0F013F\n"));
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.inflight_count(), 0);
    assert_eq!(engine.cache().value_by_name("stateOfCharge"), None);
}

#[test]
fn test_refused_set_stays_inflight() {
    let (mut engine, _channel) = engine_with_channel(2000);
    engine.enqueue(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    // the device echoes state OK but the old value: a refusal
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":84E030000FC\n"));
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.inflight_count(), 1);
}

#[test]
fn test_refused_command_restarts_when_relay_off() {
    let (mut engine, channel) = engine_with_channel(2000);
    engine.feed(&frame(&[("Relay", "OFF")]));
    engine.enqueue(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":84E030000FC\n"));
    assert_eq!(channel.count_of(":64F\n"), 1);

    // with the relay ON a restart would drop it: never issued
    let (mut engine2, channel2) = engine_with_channel(2000);
    engine2.feed(&frame(&[("Relay", "ON")]));
    engine2.enqueue(Command::set(REG_RELAY_STATE, 0, 1).unwrap());
    engine2.feed(&frame_with_trailer(&[("V", "24340")], ":84E030001FB\n"));
    assert_eq!(channel2.count_of(":64F\n"), 0);
}

#[test]
fn test_restart_every_fifth_timeout_when_relay_off() {
    let (mut engine, channel) = engine_with_channel(10);
    engine.feed(&frame(&[("Relay", "OFF")]));
    engine.enqueue(Command::get(REG_SOC).unwrap().with_max_retries(10));
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(20));
        engine.poll();
    }
    assert_eq!(channel.count_of(":64F\n"), 1);
}

#[test]
fn test_invalid_response_checksum_leaves_queue() {
    let (mut engine, _channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    // last hex digit corrupted: command checksum fails
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":7FF0F006C03D2\n"));
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.inflight_count(), 1);
    assert_eq!(engine.cache().value_by_name("stateOfCharge"), None);
}

#[test]
fn test_ping_reply_fills_version() {
    let (mut engine, channel) = engine_with_channel(2000);
    engine.enqueue(Command::ping().unwrap());
    assert_eq!(channel.count_of(":154\n"), 1);
    // ping reply carries the application version, little-endian
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":51641F9\n"));
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(
        engine.cache().value_by_name("version"),
        Some(&Value::Text("0x4116".into()))
    );
}

#[test]
fn test_deferred_until_synchronized() {
    let channel = MemoryChannel::new();
    let mut engine = ProtocolEngine::new(default_cache(), EngineConfig::default());
    engine.attach_channel(Box::new(channel.clone()));
    engine.enqueue(Command::ping().unwrap());
    // no frame seen yet: nothing may go out
    assert_eq!(channel.count_of(":154\n"), 0);
    engine.feed(b"\r\n");
    engine.feed(&frame(&[("V", "24340")]));
    // a later queue interaction drives the held-back head
    engine.enqueue(Command::get(REG_SOC).unwrap());
    assert_eq!(channel.count_of(":154\n"), 1);
    assert_eq!(channel.count_of(":7FF0F0040\n"), 0);
}

#[test]
fn test_restart_ack_not_correlated() {
    let (mut engine, _channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    engine.feed(&frame_with_trailer(&[("V", "24340")], ":4000051\n"));
    // the acknowledgement is recognized but retires nothing
    assert_eq!(engine.queue_len(), 1);
    assert_eq!(engine.inflight_count(), 1);
}

#[test]
fn test_multiple_responses_in_one_trailer() {
    let (mut engine, _channel) = engine_with_channel(2000);
    engine.enqueue(Command::get(REG_SOC).unwrap());
    // restart ack and the awaited get response share one trailer
    engine.feed(&frame_with_trailer(
        &[("V", "24340")],
        ":4000051\n:7FF0F006C03D1\n",
    ));
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(
        engine.cache().value_by_name("stateOfCharge"),
        Some(&Value::Int(876))
    );
}
