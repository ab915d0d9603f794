//! Superblock structure and serialization.
//!
//! The superblock occupies the first `SUPERBLOCK_SIZE` bytes of a database
//! file and records where the record log ends and which record id comes next.

use crate::storage::record::RecordId;

/// Magic number identifying an assembly database file: "ASMBLYDB"
pub const MAGIC: [u8; 8] = *b"ASMBLYDB";

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes reserved for the superblock at the start of the file.
pub const SUPERBLOCK_SIZE: usize = 64;

/// Superblock field offsets. All integers are little-endian.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const NEXT_RECORD_ID: usize = 12;
    pub const LOG_END: usize = 20;
    pub const RECORD_COUNT: usize = 28;
    // 36-59: reserved
    pub const CHECKSUM: usize = 60;
}

/// File-level metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub format_version: u32,
    /// Next record id to allocate.
    pub next_record_id: RecordId,
    /// Byte offset one past the last log frame known to be durable.
    pub log_end: u64,
    /// Live records at the last sync.
    pub record_count: u64,
}

impl Superblock {
    /// Superblock for a fresh file with an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            next_record_id: RecordId::FIRST,
            log_end: SUPERBLOCK_SIZE as u64,
            record_count: 0,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        put(&mut buf, offsets::FORMAT_VERSION, &self.format_version.to_le_bytes());
        put(
            &mut buf,
            offsets::NEXT_RECORD_ID,
            &self.next_record_id.get().to_le_bytes(),
        );
        put(&mut buf, offsets::LOG_END, &self.log_end.to_le_bytes());
        put(&mut buf, offsets::RECORD_COUNT, &self.record_count.to_le_bytes());
        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        put(&mut buf, offsets::CHECKSUM, &checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SUPERBLOCK_SIZE]) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[offsets::MAGIC..offsets::MAGIC + 8]);
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let stored = read_u32(buf, offsets::CHECKSUM);
        let computed = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        if stored != computed {
            return Err(SuperblockError::ChecksumMismatch { stored, computed });
        }

        let format_version = read_u32(buf, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let next_record_id = RecordId::from_raw(read_u64(buf, offsets::NEXT_RECORD_ID))
            .ok_or(SuperblockError::InvalidField("next_record_id"))?;
        let log_end = read_u64(buf, offsets::LOG_END);
        if log_end < SUPERBLOCK_SIZE as u64 {
            return Err(SuperblockError::InvalidField("log_end"));
        }

        Ok(Self {
            format_version,
            next_record_id,
            log_end,
            record_count: read_u64(buf, offsets::RECORD_COUNT),
        })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Stored checksum does not match the contents.
    ChecksumMismatch { stored: u32, computed: u32 },
    /// A field holds an impossible value.
    InvalidField(&'static str),
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "superblock checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
            Self::InvalidField(field) => write!(f, "invalid superblock field: {field}"),
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new();
        sb.next_record_id = RecordId(42);
        sb.log_end = 4096;
        sb.record_count = 17;

        let restored = Superblock::from_bytes(&sb.to_bytes()).expect("should parse");
        assert_eq!(restored, sb);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut buf = Superblock::new().to_bytes();
        buf[..8].copy_from_slice(b"BADMAGIC");
        assert!(matches!(
            Superblock::from_bytes(&buf),
            Err(SuperblockError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_superblock_detects_bit_flip() {
        let mut buf = Superblock::new().to_bytes();
        buf[offsets::LOG_END] ^= 0x01;
        assert!(matches!(
            Superblock::from_bytes(&buf),
            Err(SuperblockError::ChecksumMismatch { .. })
        ));
    }
}
