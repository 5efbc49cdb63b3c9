//! Protocol engine
//!
//! The orchestrator for both data flows on the serial line: periodic
//! telemetry frames are checksummed and staged into the register cache,
//! and command responses found behind a frame's checksum byte are
//! correlated against the single inflight command. Timeouts, retries and
//! queue advancement all run from [`ProtocolEngine::poll`], which the
//! owning reader loop calls between reads; the engine itself never
//! spawns anything.

use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::checksum::FrameChecksum;
use super::message::{Command, CommandKind, Response};
use super::queue::{CommandQueue, InsertOutcome};
use super::stream::CommunicationChannel;
use super::{DEFER_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::recorder::RawRecorder;
use crate::registers::RegisterCache;

/// Splits the inbound byte stream at CR-LF boundaries.
///
/// Everything before the first CR-LF is discarded; the stream is joined
/// mid-frame and the first partial frame cannot be validated.
struct LineReader {
    buf: Vec<u8>,
    synchronized: bool,
}

impl LineReader {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            synchronized: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.buf.drain(..pos + 2).take(pos).collect();
            if self.synchronized {
                lines.push(line);
            } else {
                self.synchronized = true;
            }
        }
        lines
    }
}

/// One inflight command awaiting its response.
struct PendingRequest {
    /// Wire characters a matching response must start with
    expected_prefix: String,
    /// Identifier of the originating command, for queue removal
    original_command_id: String,
    kind: CommandKind,
    deadline: Instant,
    remaining_retries: u32,
    /// Timeout events seen by this request; every fifth one may trigger a
    /// device restart
    timeouts: u32,
}

/// Engine tuning knobs, filled from the application config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Collapse repeated writes of the same register onto the queue tail
    pub compression: bool,
    /// How long to wait for a command response before retrying
    pub response_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compression: true,
            response_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// The protocol engine. One instance owns the register cache, the command
/// queue and the write half of the serial channel.
pub struct ProtocolEngine {
    cache: RegisterCache,
    queue: CommandQueue,
    pending: HashMap<String, PendingRequest>,
    reader: LineReader,
    checksum: FrameChecksum,
    frame_open: bool,
    frame_timestamp: DateTime<Utc>,
    /// False until the first complete line has been seen
    operational: bool,
    deferred_until: Option<Instant>,
    channel: Option<Box<dyn CommunicationChannel>>,
    recorder: Option<RawRecorder>,
    response_timeout: Duration,
    /// Cumulative time spent waiting on responses that never came
    max_response_time: Duration,
    rx_lines: u64,
    tx_commands: u64,
}

impl ProtocolEngine {
    pub fn new(cache: RegisterCache, config: EngineConfig) -> Self {
        Self {
            cache,
            queue: CommandQueue::new(config.compression),
            pending: HashMap::new(),
            reader: LineReader::new(),
            checksum: FrameChecksum::new(),
            frame_open: false,
            frame_timestamp: Utc::now(),
            operational: false,
            deferred_until: None,
            channel: None,
            recorder: None,
            response_timeout: config.response_timeout,
            max_response_time: Duration::ZERO,
            rx_lines: 0,
            tx_commands: 0,
        }
    }

    pub fn attach_channel(&mut self, channel: Box<dyn CommunicationChannel>) {
        self.channel = Some(channel);
    }

    pub fn detach_channel(&mut self) {
        self.channel = None;
    }

    pub fn set_recorder(&mut self, recorder: Option<RawRecorder>) {
        self.recorder = recorder;
    }

    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RegisterCache {
        &mut self.cache
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn inflight_count(&self) -> usize {
        self.pending.len()
    }

    /// Cumulative time spent in command timeouts, for diagnostics.
    pub fn max_response_time(&self) -> Duration {
        self.max_response_time
    }

    /// Lines received / commands transmitted counters.
    pub fn counters(&self) -> (u64, u64) {
        (self.rx_lines, self.tx_commands)
    }

    /// Feed raw serial bytes into the splitter and process any complete
    /// lines.
    pub fn feed(&mut self, bytes: &[u8]) {
        for line in self.reader.push(bytes) {
            self.rx_lines += 1;
            if let Some(rec) = self.recorder.as_mut() {
                rec.record(&line);
            }
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        self.operational = true;
        if line.starts_with(b"Checksum\t") {
            self.handle_checksum_line(line);
        } else {
            self.handle_field_line(line);
        }
    }

    fn handle_field_line(&mut self, line: &[u8]) {
        // the splitter consumed this line's CR-LF; it still counts
        self.checksum.update(b"\r\n");
        self.checksum.update(line);

        if !self.frame_open {
            self.frame_open = true;
            self.frame_timestamp = Utc::now();
        }

        let Some(tab) = line.iter().position(|b| *b == b'\t') else {
            eprintln!(
                "[DEBUG] engine: field line without separator: {:?}",
                String::from_utf8_lossy(line)
            );
            return;
        };
        match (
            std::str::from_utf8(&line[..tab]),
            std::str::from_utf8(&line[tab + 1..]),
        ) {
            (Ok(key), Ok(value)) => self.cache.stage_by_key(key, value),
            _ => eprintln!("[DEBUG] engine: non-ASCII field line, skipped"),
        }
    }

    /// The checksum line closes the frame. Its value is a single raw byte,
    /// and anything after that byte on the same logical line is command
    /// responses glued to the frame.
    fn handle_checksum_line(&mut self, line: &[u8]) {
        const LABEL_LEN: usize = "Checksum\t".len();
        let frame_end = (LABEL_LEN + 1).min(line.len());

        self.checksum.update(b"\r\n");
        self.checksum.update(&line[..frame_end]);

        let complete = line.len() > LABEL_LEN;
        if complete && self.checksum.is_valid() {
            self.cache.commit_and_dispatch(self.frame_timestamp);
        } else {
            eprintln!(
                "[WARN] engine: telemetry frame rejected (byte sum {:#04x})",
                self.checksum.sum()
            );
            self.cache.discard_staged();
        }
        self.checksum.reset();
        self.frame_open = false;

        if line.len() > frame_end {
            self.handle_trailer(&line[frame_end..]);
        }
    }

    /// Zero or more `:`-framed command responses trailing a frame.
    fn handle_trailer(&mut self, bytes: &[u8]) {
        for fragment in bytes.split(|b| *b == b':') {
            if fragment.is_empty() {
                continue;
            }
            let Ok(text) = std::str::from_utf8(fragment) else {
                eprintln!("[WARN] engine: non-ASCII response fragment, ignored");
                continue;
            };
            match Response::parse(text) {
                Ok(resp) => self.route_response(resp),
                Err(e) => {
                    // the inflight command stays; the timeout drives the retry
                    eprintln!("[WARN] engine: bad response {:?}: {}", text, e);
                }
            }
        }
    }

    fn route_response(&mut self, resp: Response) {
        let id = resp.identifier().to_string();
        if self.pending.contains_key(&id) {
            self.handle_correlated(&id, resp);
        } else if id == "40000" {
            eprintln!("[INFO] engine: restart acknowledged");
        } else if id.starts_with('3') {
            eprintln!("[WARN] engine: device reports unknown command: {}", resp.raw());
        } else if id.starts_with("AAAA") || id == "2AAAA" {
            eprintln!("[WARN] engine: device reports framing error: {}", resp.raw());
        } else {
            eprintln!("[DEBUG] engine: unwarranted response {:?}", resp.raw());
        }
    }

    fn handle_correlated(&mut self, id: &str, resp: Response) {
        let (matches_prefix, state_ok) = {
            let p = &self.pending[id];
            (
                resp.raw().starts_with(p.expected_prefix.as_str()),
                resp.state().map(|s| s.is_ok()).unwrap_or(true),
            )
        };

        if matches_prefix {
            let p = match self.pending.remove(id) {
                Some(p) => p,
                None => return,
            };
            self.queue.delete(&p.original_command_id);
            self.resolve(p.kind, &resp);
            self.advance_queue();
        } else if !state_ok {
            // the device understood and refused permanently; retrying the
            // same write cannot change the answer
            let p = match self.pending.remove(id) {
                Some(p) => p,
                None => return,
            };
            eprintln!(
                "[WARN] engine: device error state {:?} for {}",
                resp.state(),
                p.original_command_id
            );
            self.queue.delete(&p.original_command_id);
            self.advance_queue();
        } else {
            eprintln!("[WARN] engine: device refused {:?}", resp.raw());
            if self.relay_is_off() {
                self.write_restart();
            }
            // leave the command inflight; the timeout re-drives it
        }
    }

    /// Apply a successfully correlated response to the cache.
    fn resolve(&mut self, kind: CommandKind, resp: &Response) {
        use crate::registers::Value;
        match kind {
            CommandKind::Ping | CommandKind::AppVersion | CommandKind::ProductId => {
                let name = if kind == CommandKind::ProductId {
                    "productId"
                } else {
                    "version"
                };
                if let Some(value) = resp.value() {
                    self.cache.stage_by_name(name, Value::Text(format!("0x{}", value)));
                    self.cache.commit_and_dispatch(Utc::now());
                }
            }
            CommandKind::Get | CommandKind::Set => {
                let Some(address) = resp.message().address else {
                    return;
                };
                let Some(hex) = resp.value() else {
                    eprintln!("[DEBUG] engine: response without value for {:#06x}", address);
                    return;
                };
                let converted = match self.cache.descriptor_by_address(address) {
                    Some(desc) => desc.from_hex_str(hex),
                    None => {
                        eprintln!(
                            "[WARN] engine: response for unknown register {:#06x}, dropped",
                            address
                        );
                        return;
                    }
                };
                match converted {
                    Ok(value) => {
                        self.cache.stage_by_address(address, value);
                        self.cache.commit_and_dispatch(Utc::now());
                    }
                    Err(e) => eprintln!(
                        "[WARN] engine: bad value {:?} for {:#06x}: {}",
                        hex, address, e
                    ),
                }
            }
            CommandKind::Restart | CommandKind::AsyncSet => {}
        }
    }

    /// Queue a command and try to transmit.
    pub fn enqueue(&mut self, cmd: Command) -> InsertOutcome {
        let outcome = self.queue.insert(cmd);
        self.drive_queue();
        outcome
    }

    /// Remove a queued command by identifier.
    pub fn dequeue(&mut self, identifier: &str) -> super::message::ResponseState {
        self.queue.delete(identifier)
    }

    /// Transmit the head command unless it is already inflight.
    fn drive_queue(&mut self) {
        let now = Instant::now();
        if self.queue.is_empty() {
            return;
        }
        if !self.operational {
            // no frame seen yet; hold off and let poll() retry
            if self.deferred_until.is_none() {
                self.deferred_until = Some(now + Duration::from_millis(DEFER_INTERVAL_MS));
            }
            return;
        }

        // fire-and-forget heads (async-set) are written and skipped over
        while let Some(head) = self.queue.head() {
            if head.expected_response_key().is_some() {
                break;
            }
            let wire = head.wire().to_string();
            let id = head.identifier().to_string();
            self.write_wire(&wire);
            self.queue.delete(&id);
        }

        let Some(head) = self.queue.head() else { return };
        let Some(key) = head.expected_response_key() else {
            return;
        };
        if self.pending.contains_key(&key) {
            return;
        }
        self.send_head(now);
    }

    /// Unconditionally transmit the queue head, creating or re-arming its
    /// PendingRequest. A resend decrements the retry budget.
    fn send_head(&mut self, now: Instant) {
        let Some(head) = self.queue.head() else { return };
        let Some(key) = head.expected_response_key() else {
            return;
        };
        let wire = head.wire().to_string();
        let prefix = head.expected_prefix().to_string();
        let id = head.identifier().to_string();
        let kind = head.kind;
        let max_retries = head.max_retries;
        let deadline = now + self.response_timeout;

        self.pending
            .entry(key)
            .and_modify(|p| {
                p.remaining_retries = p.remaining_retries.saturating_sub(1);
                p.deadline = deadline;
            })
            .or_insert(PendingRequest {
                expected_prefix: prefix,
                original_command_id: id,
                kind,
                deadline,
                remaining_retries: max_retries,
                timeouts: 0,
            });

        self.write_wire(&wire);
    }

    /// After the head retired, transmit whatever comes next at raised
    /// priority.
    fn advance_queue(&mut self) {
        if self.queue.promote_head() {
            self.drive_queue();
        }
    }

    /// Timer duties: deferred transmissions and response timeouts. Call
    /// between reads.
    pub fn poll(&mut self) {
        let now = Instant::now();

        if let Some(t) = self.deferred_until {
            if now >= t {
                self.deferred_until = None;
                self.drive_queue();
            }
        }

        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            self.max_response_time += self.response_timeout;
            let (retries_left, timeouts, original_id) = {
                let p = match self.pending.get_mut(&key) {
                    Some(p) => p,
                    None => continue,
                };
                p.timeouts += 1;
                (p.remaining_retries, p.timeouts, p.original_command_id.clone())
            };

            if retries_left > 0 {
                // the head must still be the command this request tracks;
                // anything else means it was dequeued out from under us
                let head_key = self
                    .queue
                    .head()
                    .and_then(|h| h.expected_response_key());
                if head_key.as_deref() != Some(key.as_str()) {
                    self.pending.remove(&key);
                    continue;
                }
                eprintln!(
                    "[DEBUG] engine: timeout for {}, {} retries left",
                    original_id, retries_left
                );
                // a restart can shake a wedged device loose, but it drops
                // the relay, so only when the relay is already off
                if timeouts % 5 == 0 && self.relay_is_off() {
                    self.write_restart();
                }
                self.send_head(now);
            } else {
                eprintln!("[WARN] engine: retries exhausted for {}", original_id);
                self.pending.remove(&key);
                self.queue.delete(&original_id);
                self.advance_queue();
            }
        }
    }

    /// Restart bypasses the queue entirely; its acknowledgement is
    /// recognized in routing but never correlated.
    pub fn write_restart(&mut self) {
        match Command::restart() {
            Ok(cmd) => {
                eprintln!("[INFO] engine: issuing device restart");
                self.write_wire(cmd.wire());
            }
            Err(e) => eprintln!("[WARN] engine: could not frame restart: {}", e),
        }
    }

    fn relay_is_off(&self) -> bool {
        self.cache
            .value_by_key("Relay")
            .and_then(|v| v.as_text())
            .map(|s| s == "OFF")
            .unwrap_or(false)
    }

    fn write_wire(&mut self, wire: &str) {
        let Some(channel) = self.channel.as_mut() else {
            eprintln!("[WARN] engine: no channel attached, dropping write");
            return;
        };
        match channel
            .write_all(wire.as_bytes())
            .and_then(|_| channel.flush())
        {
            Ok(()) => self.tx_commands += 1,
            Err(e) => eprintln!("[WARN] engine: serial write failed: {}", e),
        }
    }
}
