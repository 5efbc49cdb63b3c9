//! Command and response messages
//!
//! Structured forms of the hex register protocol. An outbound [`Command`]
//! carries its fully framed wire string with the check byte appended; an
//! inbound [`Response`] is parsed from a fragment found after a telemetry
//! frame's checksum byte.

use super::checksum::{command_checksum, verify_command};
use super::hex::{int_to_hex, parse_hex_int, swap_hex};
use super::ProtocolError;

/// Device status byte carried in command responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Ok,
    UnknownId,
    NotSupported,
    ParameterError,
    Other(u8),
}

impl ResponseState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => ResponseState::Ok,
            0x01 => ResponseState::UnknownId,
            0x02 => ResponseState::NotSupported,
            0x04 => ResponseState::ParameterError,
            other => ResponseState::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ResponseState::Ok => 0x00,
            ResponseState::UnknownId => 0x01,
            ResponseState::NotSupported => 0x02,
            ResponseState::ParameterError => 0x04,
            ResponseState::Other(c) => *c,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseState::Ok)
    }
}

/// One register-protocol message, outbound or inbound.
///
/// `value` is held big-endian; the little-endian swap happens at the wire
/// boundary in [`Message::wire_body`] and [`Response::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Single hex command digit
    pub command: char,
    /// Register address for get/set style messages
    pub address: Option<u16>,
    /// Status byte (always 0x00 on outbound messages)
    pub state: Option<u8>,
    /// Big-endian hex payload
    pub value: Option<String>,
}

/// Response digits that never carry an address.
fn is_plain_digit(c: char) -> bool {
    matches!(c, '1' | '3' | '5')
}

impl Message {
    /// Serialize to the wire body: command digit, swapped address, status
    /// byte and swapped value, without `:` framing or check byte.
    pub fn wire_body(&self) -> Result<String, ProtocolError> {
        let mut body = String::new();
        body.push(self.command);
        if let Some(addr) = self.address {
            body.push_str(&swap_hex(&format!("{:04X}", addr), 2)?);
            body.push_str(&format!("{:02X}", self.state.unwrap_or(0)));
            if let Some(value) = &self.value {
                body.push_str(&swap_hex(value, value.len() / 2)?);
            }
        }
        Ok(body)
    }

    /// Correlation identifier: the command digit alone, or the digit plus
    /// the swapped-address prefix (the leading five wire characters) for
    /// addressed messages.
    pub fn identifier(&self) -> Result<String, ProtocolError> {
        match self.address {
            Some(addr) => Ok(format!(
                "{}{}",
                self.command,
                swap_hex(&format!("{:04X}", addr), 2)?
            )),
            None => Ok(self.command.to_string()),
        }
    }
}

/// What a command does, used at resolution time to pick the target
/// descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    AppVersion,
    ProductId,
    Restart,
    Get,
    Set,
    /// Supported on the wire but never correlated; known-unreliable on
    /// shipping firmware, so nothing constructs it by default.
    AsyncSet,
}

impl CommandKind {
    pub fn digit(&self) -> char {
        match self {
            CommandKind::Ping => '1',
            CommandKind::AppVersion => '3',
            CommandKind::ProductId => '4',
            CommandKind::Restart => '6',
            CommandKind::Get => '7',
            CommandKind::Set => '8',
            CommandKind::AsyncSet => 'A',
        }
    }

    /// The response digit this command is answered with: get/set echo the
    /// command digit, ping gets the dedicated ping-reply digit, version and
    /// product id queries are answered with a done-reply.
    fn response_digit(&self) -> Option<char> {
        match self {
            CommandKind::Ping => Some('5'),
            CommandKind::AppVersion | CommandKind::ProductId => Some('1'),
            CommandKind::Get => Some('7'),
            CommandKind::Set => Some('8'),
            CommandKind::Restart | CommandKind::AsyncSet => None,
        }
    }
}

/// A framed command ready for transmission.
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    message: Message,
    /// Full wire form including `:` framing, check byte and newline
    wire: String,
    /// Wire body without the check byte; what a matching response echoes
    expected_prefix: String,
    identifier: String,
    pub priority: u8,
    pub max_retries: u32,
}

impl Command {
    fn build(kind: CommandKind, message: Message) -> Result<Self, ProtocolError> {
        let body = message.wire_body()?;
        let chk = command_checksum(&body)?;
        let wire = format!(":{}{:02X}\n", body, chk);
        let identifier = message.identifier()?;
        // a matching response echoes digit, address and OK status; for set
        // commands the transmitted body also contains the value, so the
        // prefix covers the echoed value too
        let expected_prefix = match kind.response_digit() {
            Some(d) => format!("{}{}", d, &body[1..]),
            None => String::new(),
        };
        Ok(Self {
            kind,
            message,
            wire,
            expected_prefix,
            identifier,
            priority: 0,
            max_retries: 3,
        })
    }

    pub fn ping() -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::Ping,
            Message {
                command: '1',
                address: None,
                state: None,
                value: None,
            },
        )
    }

    pub fn app_version() -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::AppVersion,
            Message {
                command: '3',
                address: None,
                state: None,
                value: None,
            },
        )
    }

    pub fn product_id() -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::ProductId,
            Message {
                command: '4',
                address: None,
                state: None,
                value: None,
            },
        )
    }

    pub fn restart() -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::Restart,
            Message {
                command: '6',
                address: None,
                state: None,
                value: None,
            },
        )
    }

    pub fn get(address: u16) -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::Get,
            Message {
                command: '7',
                address: Some(address),
                state: Some(0),
                value: None,
            },
        )
    }

    pub fn set(address: u16, value: i64, width: usize) -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::Set,
            Message {
                command: '8',
                address: Some(address),
                state: Some(0),
                value: Some(int_to_hex(value, width)?),
            },
        )
    }

    pub fn async_set(address: u16, value: i64, width: usize) -> Result<Self, ProtocolError> {
        Self::build(
            CommandKind::AsyncSet,
            Message {
                command: 'A',
                address: Some(address),
                state: Some(0),
                value: Some(int_to_hex(value, width)?),
            },
        )
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn wire(&self) -> &str {
        &self.wire
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The wire characters a matching response must start with.
    pub fn expected_prefix(&self) -> &str {
        &self.expected_prefix
    }

    /// Key under which the engine files the PendingRequest for this
    /// command; `None` for fire-and-forget commands.
    pub fn expected_response_key(&self) -> Option<String> {
        let digit = self.kind.response_digit()?;
        match self.message.address {
            Some(_) => Some(format!("{}{}", digit, &self.expected_prefix[1..5])),
            None => Some(digit.to_string()),
        }
    }
}

/// A parsed inbound response fragment.
#[derive(Debug, Clone)]
pub struct Response {
    message: Message,
    /// Fragment as received, checksum included, newline trimmed
    raw: String,
    identifier: String,
}

impl Response {
    /// Parse one `:`-delimited fragment. The fragment arrives without the
    /// leading colon; a trailing newline is tolerated and trimmed.
    pub fn parse(fragment: &str) -> Result<Self, ProtocolError> {
        let raw = fragment.trim_end_matches('\n');
        if raw.len() < 3 {
            return Err(ProtocolError::MalformedResponse(raw.to_string()));
        }
        verify_command(raw)?;

        let command = raw
            .chars()
            .next()
            .filter(|c| c.is_ascii_hexdigit())
            .ok_or_else(|| ProtocolError::MalformedResponse(raw.to_string()))?;
        // everything between the digit and the two-character check byte
        let inner = &raw[1..raw.len() - 2];

        let message = if matches!(command, '7' | '8' | 'A') && inner.len() >= 6 {
            let address = parse_hex_int(&swap_hex(&inner[0..4], 2)?, false)? as u16;
            let state = u8::from_str_radix(&inner[4..6], 16)
                .map_err(|_| ProtocolError::MalformedResponse(raw.to_string()))?;
            let value_le = &inner[6..];
            let value = if value_le.is_empty() {
                None
            } else {
                Some(swap_hex(value_le, value_le.len() / 2)?)
            };
            Message {
                command,
                address: Some(address),
                state: Some(state),
                value,
            }
        } else {
            let value = if inner.is_empty() {
                None
            } else if matches!(inner.len(), 2 | 4 | 8) {
                Some(swap_hex(inner, inner.len() / 2)?)
            } else {
                // odd payloads are kept verbatim rather than rejected so
                // unsolicited frames can still be identified and logged
                Some(inner.to_string())
            };
            Message {
                command,
                address: None,
                state: None,
                value,
            }
        };

        let identifier = if is_plain_digit(command) || raw.len() < 5 {
            command.to_string()
        } else {
            raw[0..5].to_string()
        };

        Ok(Self {
            message,
            raw: raw.to_string(),
            identifier,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Device status, when the response carries one
    pub fn state(&self) -> Option<ResponseState> {
        self.message.state.map(ResponseState::from_code)
    }

    /// Big-endian hex payload, when present
    pub fn value(&self) -> Option<&str> {
        self.message.value.as_deref()
    }

    /// Fragment as received, for prefix comparison against the inflight
    /// command
    pub fn raw(&self) -> &str {
        &self.raw
    }
}
