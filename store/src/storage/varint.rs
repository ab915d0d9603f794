//! Variable-length integer encoding.
//!
//! Every integer field in node and record images uses this encoding:
//!
//! - Unsigned values are split into 7-bit groups, least-significant group
//!   first. Each byte carries one group; the high bit is set on every byte
//!   except the last.
//! - Signed values are mapped to `(abs(v) << 1) | sign` and then written as
//!   unsigned values, so `0, 1, -1, 2, -2` become `0, 2, 3, 4, 5`. The
//!   magnitude of `i64::MIN` has no room for the sign bit and is rejected.
//!
//! | Width | Max bytes |
//! |-------|-----------|
//! | 32-bit | 5 |
//! | 64-bit | 10 |
//!
//! Encoders append to a `Vec<u8>` and return the number of bytes written.
//! Decoders return `(value, bytes_consumed)` and never read past the slice.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]

/// Maximum encoded size of a 32-bit value.
pub const MAX_LEN_32: usize = 5;

/// Maximum encoded size of a 64-bit value.
pub const MAX_LEN_64: usize = 10;

/// Compute the encoded length of an unsigned value without encoding it.
#[must_use]
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append an unsigned 64-bit value.
pub fn encode_u64(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out.len() - start
}

/// Append an unsigned 32-bit value.
pub fn encode_u32(value: u32, out: &mut Vec<u8>) -> usize {
    encode_u64(u64::from(value), out)
}

/// Append a signed 64-bit value.
///
/// Fails with `OutOfRange` for `i64::MIN` and leaves `out` untouched.
pub fn encode_i64(value: i64, out: &mut Vec<u8>) -> Result<usize, VarintError> {
    let mapped = zigzag_encode(value).ok_or(VarintError::OutOfRange)?;
    Ok(encode_u64(mapped, out))
}

/// Append a signed 32-bit value. Every `i32` is representable.
pub fn encode_i32(value: i32, out: &mut Vec<u8>) -> usize {
    let mapped = (u64::from(value.unsigned_abs()) << 1) | u64::from(value < 0);
    encode_u64(mapped, out)
}

/// Decode an unsigned 64-bit value.
pub fn decode_u64(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_LEN_64 {
            return Err(VarintError::Overflow);
        }
        let group = u64::from(byte & 0x7F);
        let shift = 7 * i as u32;
        // The tenth byte may only contribute the single remaining bit.
        if i == MAX_LEN_64 - 1 && group > 1 {
            return Err(VarintError::Overflow);
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(VarintError::Truncated)
}

/// Decode an unsigned 32-bit value.
pub fn decode_u32(buf: &[u8]) -> Result<(u32, usize), VarintError> {
    let (value, len) = decode_u64(buf)?;
    if len > MAX_LEN_32 {
        return Err(VarintError::Overflow);
    }
    let value = u32::try_from(value).map_err(|_| VarintError::Overflow)?;
    Ok((value, len))
}

/// Decode a signed 64-bit value.
pub fn decode_i64(buf: &[u8]) -> Result<(i64, usize), VarintError> {
    let (value, len) = decode_u64(buf)?;
    Ok((zigzag_decode(value), len))
}

/// Decode a signed 32-bit value.
pub fn decode_i32(buf: &[u8]) -> Result<(i32, usize), VarintError> {
    let (value, len) = decode_i64(buf)?;
    if len > MAX_LEN_32 {
        return Err(VarintError::Overflow);
    }
    let value = i32::try_from(value).map_err(|_| VarintError::Overflow)?;
    Ok((value, len))
}

/// Map a signed value onto the unsigned range, magnitude shifted up one bit
/// and the sign in bit 0. `None` for `i64::MIN`.
#[must_use]
pub const fn zigzag_encode(value: i64) -> Option<u64> {
    let magnitude = value.unsigned_abs();
    if magnitude > (u64::MAX >> 1) {
        return None;
    }
    Some((magnitude << 1) | (value < 0) as u64)
}

/// Inverse of [`zigzag_encode`]. A negative zero decodes as zero.
#[must_use]
pub const fn zigzag_decode(value: u64) -> i64 {
    let magnitude = (value >> 1) as i64;
    if value & 1 == 1 { -magnitude } else { magnitude }
}

/// Errors that can occur when decoding a varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarintError {
    /// The buffer ended while the continuation bit was still set.
    Truncated,
    /// The encoded value does not fit the requested width.
    Overflow,
    /// The value has no signed encoding.
    OutOfRange,
}

impl std::fmt::Display for VarintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated varint"),
            Self::Overflow => write!(f, "varint overflows target width"),
            Self::OutOfRange => write!(f, "value has no signed varint encoding"),
        }
    }
}

impl std::error::Error for VarintError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_u64(value: u64) -> usize {
        let mut buf = Vec::new();
        let written = encode_u64(value, &mut buf);
        assert_eq!(written, buf.len());
        assert_eq!(written, varint_len(value));
        let (decoded, read) = decode_u64(&buf).expect("decode");
        assert_eq!(decoded, value);
        assert_eq!(read, written);
        written
    }

    #[test]
    fn test_single_byte_values() {
        let mut buf = Vec::new();
        encode_u64(0, &mut buf);
        encode_u64(1, &mut buf);
        encode_u64(127, &mut buf);
        assert_eq!(buf, vec![0x00, 0x01, 0x7F]);
    }

    #[test]
    fn test_little_endian_group_order() {
        let mut buf = Vec::new();
        encode_u64(300, &mut buf);
        // 300 = 0b10_0101100 -> low group 0x2C with continuation, then 0x02
        assert_eq!(buf, vec![0xAC, 0x02]);
    }

    #[test]
    fn test_unsigned_boundaries() {
        assert_eq!(roundtrip_u64(127), 1);
        assert_eq!(roundtrip_u64(128), 2);
        assert_eq!(roundtrip_u64(16_383), 2);
        assert_eq!(roundtrip_u64(16_384), 3);
        assert_eq!(roundtrip_u64(u64::from(u32::MAX)), MAX_LEN_32);
        assert_eq!(roundtrip_u64(u64::MAX), MAX_LEN_64);
    }

    #[test]
    fn test_u32_never_exceeds_five_bytes() {
        for value in [0, 1, 255, 65_535, 1 << 28, u32::MAX - 1, u32::MAX] {
            let mut buf = Vec::new();
            let len = encode_u32(value, &mut buf);
            assert!(len <= MAX_LEN_32);
            assert_eq!(decode_u32(&buf).expect("decode"), (value, len));
        }
    }

    #[test]
    fn test_signed_roundtrip() {
        for value in [0i64, 1, -1, 63, -64, 64, -65, i64::from(i32::MIN), i64::MAX, i64::MIN + 1] {
            let mut buf = Vec::new();
            let len = encode_i64(value, &mut buf).expect("encode");
            assert!(len <= MAX_LEN_64);
            assert_eq!(decode_i64(&buf).expect("decode"), (value, len));
        }
        for value in [0i32, -1, 1, i32::MIN, i32::MAX] {
            let mut buf = Vec::new();
            let len = encode_i32(value, &mut buf);
            assert!(len <= MAX_LEN_32);
            assert_eq!(decode_i32(&buf).expect("decode"), (value, len));
        }
    }

    #[test]
    fn test_sign_magnitude_mapping() {
        assert_eq!(zigzag_encode(0), Some(0));
        assert_eq!(zigzag_encode(1), Some(2));
        assert_eq!(zigzag_encode(-1), Some(3));
        assert_eq!(zigzag_encode(-5), Some(11));
        assert_eq!(zigzag_decode(11), -5);
        assert_eq!(zigzag_decode(1), 0);
        assert_eq!(zigzag_encode(i64::MIN), None);
    }

    #[test]
    fn test_signed_wire_bytes() {
        let mut buf = Vec::new();
        encode_i32(-1, &mut buf);
        assert_eq!(buf, vec![0x03]);

        let mut buf = Vec::new();
        encode_i64(-5, &mut buf).expect("encode");
        encode_i32(5, &mut buf);
        encode_i32(-64, &mut buf);
        assert_eq!(buf, vec![0x0B, 0x0A, 0x81, 0x01]);

        let mut buf = Vec::new();
        assert_eq!(encode_i64(i64::MIN, &mut buf), Err(VarintError::OutOfRange));
        assert!(buf.is_empty());

        let mut buf = Vec::new();
        let len = encode_i32(i32::MIN, &mut buf);
        assert_eq!(len, MAX_LEN_32);
        assert_eq!(decode_i32(&buf).expect("decode"), (i32::MIN, len));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode_u64(&[]), Err(VarintError::Truncated));
        assert_eq!(decode_u64(&[0x80, 0x80]), Err(VarintError::Truncated));
    }

    #[test]
    fn test_overflow_detection() {
        let mut buf = Vec::new();
        encode_u64(u64::from(u32::MAX) + 1, &mut buf);
        assert_eq!(decode_u32(&buf), Err(VarintError::Overflow));

        let too_long = [0xFFu8; 11];
        assert_eq!(decode_u64(&too_long), Err(VarintError::Overflow));

        let mut buf = Vec::new();
        encode_i64(i64::from(i32::MAX) + 1, &mut buf).expect("encode");
        assert_eq!(decode_i32(&buf), Err(VarintError::Overflow));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let (value, read) = decode_u64(&[0x05, 0xFF, 0xFF]).expect("decode");
        assert_eq!((value, read), (5, 1));
    }
}
