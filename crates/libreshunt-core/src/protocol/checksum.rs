//! Checksum disciplines
//!
//! The monitor uses two unrelated checksums on the same serial line: the
//! periodic telemetry frames carry a plain byte sum that must come out to
//! zero modulo 256, while the hex command protocol sums the command nibble
//! and payload bytes against the magic value 0x55.

use super::ProtocolError;

/// Running byte-sum accumulator for telemetry frames.
///
/// A frame is valid when the sum of every byte it contains, including the
/// CR-LF pairs consumed by the line splitter and the checksum byte itself,
/// is zero modulo 256.
#[derive(Debug, Default)]
pub struct FrameChecksum {
    sum: u8,
}

impl FrameChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a run of bytes
    pub fn update(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.sum = self.sum.wrapping_add(*b);
        }
    }

    /// Current sum modulo 256
    pub fn sum(&self) -> u8 {
        self.sum
    }

    /// True when the accumulated frame is valid
    pub fn is_valid(&self) -> bool {
        self.sum == 0
    }

    /// Reset for the next frame
    pub fn reset(&mut self) {
        self.sum = 0;
    }
}

/// Sum the nibble-aligned bytes of a hex command body.
///
/// The leading command nibble is widened with a `0` prefix so the string
/// can be read as byte pairs: body `7FF0F00` is summed as
/// `07 FF 0F 00`.
fn body_sum(body: &str) -> Result<u8, ProtocolError> {
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidHex(body.to_string()));
    }
    let padded = format!("0{}", body);
    if padded.len() % 2 != 0 {
        return Err(ProtocolError::InvalidHex(body.to_string()));
    }
    let mut sum = 0u8;
    for i in (0..padded.len()).step_by(2) {
        let byte = u8::from_str_radix(&padded[i..i + 2], 16)
            .map_err(|_| ProtocolError::InvalidHex(body.to_string()))?;
        sum = sum.wrapping_add(byte);
    }
    Ok(sum)
}

/// Compute the check byte for an outbound command body (without checksum).
///
/// The check byte is chosen so that the total sum of command nibble,
/// payload bytes and check byte is 0x55 modulo 256.
pub fn command_checksum(body: &str) -> Result<u8, ProtocolError> {
    Ok(0x55u8.wrapping_sub(body_sum(body)?))
}

/// Validate a complete command string (body with trailing check byte).
pub fn verify_command(full: &str) -> Result<(), ProtocolError> {
    let actual = body_sum(full)?;
    if actual == 0x55 {
        Ok(())
    } else {
        Err(ProtocolError::CommandChecksum { actual })
    }
}
