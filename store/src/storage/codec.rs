//! Shared helpers for record images.
//!
//! All decoders go through [`ByteReader`], which bounds-checks every read so a
//! malformed block surfaces as a [`DecodeError`] instead of an out-of-bounds
//! access.

use crate::storage::record::RecordId;
use crate::storage::varint::{self, VarintError};

/// Bounds-checked cursor over an encoded record.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next byte without consuming it.
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek_u8().ok_or(DecodeError::Truncated {
            needed: 1,
            available: 0,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_varint_u64(&mut self) -> Result<u64, DecodeError> {
        let (value, len) = varint::decode_u64(&self.buf[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    pub fn read_varint_u32(&mut self) -> Result<u32, DecodeError> {
        let (value, len) = varint::decode_u32(&self.buf[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    pub fn read_varint_i32(&mut self) -> Result<i32, DecodeError> {
        let (value, len) = varint::decode_i32(&self.buf[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    pub fn read_varint_i64(&mut self) -> Result<i64, DecodeError> {
        let (value, len) = varint::decode_i64(&self.buf[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    /// Read a record reference where zero means "none".
    pub fn read_record_ref(&mut self) -> Result<Option<RecordId>, DecodeError> {
        Ok(RecordId::from_raw(self.read_varint_u64()?))
    }

    /// Read a nul-terminated UTF-8 string.
    pub fn read_cstr(&mut self) -> Result<String, DecodeError> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodeError::Corrupt("unterminated string".to_string()))?;
        let text = std::str::from_utf8(&rest[..end]).map_err(|_| DecodeError::InvalidUtf8)?;
        self.pos += end + 1;
        Ok(text.to_string())
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::Corrupt(format!(
                "{} trailing bytes after record",
                self.remaining()
            )))
        }
    }
}

/// Append a record reference, writing zero for `None`.
pub fn write_record_ref(rec: Option<RecordId>, out: &mut Vec<u8>) {
    varint::encode_u64(rec.map_or(0, RecordId::get), out);
}

/// Append a nul-terminated string.
pub fn write_cstr(text: &str, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if text.as_bytes().contains(&0) {
        return Err(EncodeError::EmbeddedNul);
    }
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    Ok(())
}

/// Errors produced while decoding a record image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before a field was complete.
    Truncated { needed: usize, available: usize },
    /// A varint field was malformed.
    Varint(VarintError),
    /// A string field was not valid UTF-8.
    InvalidUtf8,
    /// The image is internally inconsistent.
    Corrupt(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => write!(
                f,
                "truncated record: needed {needed} bytes, {available} available"
            ),
            Self::Varint(e) => write!(f, "varint error: {e}"),
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            Self::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Varint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VarintError> for DecodeError {
    fn from(e: VarintError) -> Self {
        Self::Varint(e)
    }
}

/// Errors produced while encoding a record image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A key does not fit the one-byte length fields of a node image.
    KeyTooLong(usize),
    /// A string field contains a nul byte.
    EmbeddedNul,
    /// Two fields that must agree in length do not.
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A record reference does not fit the fixed-width wire format.
    RecordOutOfRange(RecordId),
    /// A base cannot be represented by the chosen sequence format.
    UnrepresentableBase(u8),
    /// A node holds more entries than its used-count field can describe.
    TooManyEntries(usize),
    /// A value does not fit its bit field.
    FieldOutOfRange { field: &'static str, value: u64 },
    /// A signed value has no varint encoding.
    Varint(VarintError),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyTooLong(len) => write!(f, "key of {len} bytes exceeds 255 bytes"),
            Self::EmbeddedNul => write!(f, "string field contains a nul byte"),
            Self::LengthMismatch {
                field,
                expected,
                actual,
            } => write!(f, "{field} has length {actual}, expected {expected}"),
            Self::RecordOutOfRange(rec) => {
                write!(f, "record {rec} does not fit a 32-bit reference")
            }
            Self::UnrepresentableBase(base) => {
                write!(f, "base {:?} cannot be stored in this format", char::from(*base))
            }
            Self::TooManyEntries(count) => write!(f, "{count} entries exceed node capacity"),
            Self::FieldOutOfRange { field, value } => {
                write!(f, "{field} value {value} does not fit its field")
            }
            Self::Varint(e) => write!(f, "varint error: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Varint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VarintError> for EncodeError {
    fn from(e: VarintError) -> Self {
        Self::Varint(e)
    }
}
