//! Hex payload codec
//!
//! Multi-byte values travel little-endian on the wire as uppercase hex
//! pairs; internally the driver works big-endian. The swap is its own
//! inverse and is only defined for 1, 2 and 4 byte widths.

use byteorder::{BigEndian, ByteOrder};

use super::ProtocolError;

/// Normalize a hex token: strip an optional `0x` prefix, uppercase, and
/// left-pad with zeros to `width` bytes.
fn normalize(value: &str, width: usize) -> Result<String, ProtocolError> {
    let trimmed = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if trimmed.is_empty() || trimmed.len() > width * 2 {
        return Err(ProtocolError::InvalidHex(value.to_string()));
    }
    if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidHex(value.to_string()));
    }
    Ok(format!("{:0>pad$}", trimmed.to_uppercase(), pad = width * 2))
}

/// Swap a hex value between wire order and internal order.
///
/// `width` is the value size in bytes; only 1, 2 and 4 are accepted.
pub fn swap_hex(value: &str, width: usize) -> Result<String, ProtocolError> {
    if !matches!(width, 1 | 2 | 4) {
        return Err(ProtocolError::UnsupportedWidth(width));
    }
    let norm = normalize(value, width)?;
    let mut out = String::with_capacity(norm.len());
    for i in (0..norm.len()).step_by(2).rev() {
        out.push_str(&norm[i..i + 2]);
    }
    Ok(out)
}

/// Decode a big-endian hex string into bytes.
fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, ProtocolError> {
    if hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidHex(hex.to_string()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| ProtocolError::InvalidHex(hex.to_string()))
        })
        .collect()
}

/// Parse a big-endian hex payload into an integer, honoring signedness.
pub fn parse_hex_int(hex: &str, signed: bool) -> Result<i64, ProtocolError> {
    let bytes = hex_to_bytes(hex)?;
    let value = match bytes.len() {
        1 => {
            if signed {
                bytes[0] as i8 as i64
            } else {
                bytes[0] as i64
            }
        }
        2 => {
            if signed {
                BigEndian::read_i16(&bytes) as i64
            } else {
                BigEndian::read_u16(&bytes) as i64
            }
        }
        4 => {
            if signed {
                BigEndian::read_i32(&bytes) as i64
            } else {
                BigEndian::read_u32(&bytes) as i64
            }
        }
        n => return Err(ProtocolError::UnsupportedWidth(n)),
    };
    Ok(value)
}

/// Encode an integer as a big-endian hex payload of the given width.
pub fn int_to_hex(value: i64, width: usize) -> Result<String, ProtocolError> {
    let mut buf = [0u8; 4];
    match width {
        1 => buf[0] = value as u8,
        2 => BigEndian::write_u16(&mut buf[..2], value as u16),
        4 => BigEndian::write_u32(&mut buf[..4], value as u32),
        n => return Err(ProtocolError::UnsupportedWidth(n)),
    }
    let mut out = String::with_capacity(width * 2);
    for b in &buf[..width] {
        out.push_str(&format!("{:02X}", b));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_known_values() {
        assert_eq!(swap_hex("0xBCD", 2).unwrap(), "CD0B");
        assert_eq!(swap_hex("1234", 2).unwrap(), "3412");
        assert_eq!(swap_hex("ED8D", 2).unwrap(), "8DED");
    }

    #[test]
    fn test_swap_widths() {
        assert_eq!(swap_hex("7F", 1).unwrap(), "7F");
        assert_eq!(swap_hex("DEADBEEF", 4).unwrap(), "EFBEADDE");
        assert!(matches!(
            swap_hex("001122334455", 6),
            Err(ProtocolError::UnsupportedWidth(6))
        ));
    }

    #[test]
    fn test_swap_is_involutive() {
        for (v, w) in [("0BCD", 2), ("1234", 2), ("DEADBEEF", 4)] {
            let once = swap_hex(v, w).unwrap();
            assert_eq!(swap_hex(&once, w).unwrap(), v);
        }
    }

    #[test]
    fn test_swap_rejects_garbage() {
        assert!(swap_hex("XYZ", 2).is_err());
        assert!(swap_hex("", 2).is_err());
        assert!(swap_hex("112233", 1).is_err());
    }

    #[test]
    fn test_parse_signed() {
        assert_eq!(parse_hex_int("FE0C", true).unwrap(), -500);
        assert_eq!(parse_hex_int("FE0C", false).unwrap(), 0xFE0C);
        assert_eq!(parse_hex_int("FF", true).unwrap(), -1);
        assert_eq!(parse_hex_int("FFFFFFFF", true).unwrap(), -1);
    }

    #[test]
    fn test_int_round_trip() {
        assert_eq!(int_to_hex(0x036C, 2).unwrap(), "036C");
        assert_eq!(parse_hex_int("036C", false).unwrap(), 0x036C);
        assert_eq!(int_to_hex(-500, 2).unwrap(), "FE0C");
    }
}
