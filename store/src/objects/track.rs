//! Track records: per-position annotation layers such as read depth.
//!
//! Layout: `[1B type][1B flags], bin_size, item count, items` where each item
//! is stored as a signed delta from the previous one.

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::codec::{ByteReader, DecodeError, EncodeError};
use crate::storage::varint;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Track {
    pub track_type: u8,
    pub flags: u8,
    /// Positions summarised by each item.
    pub bin_size: u32,
    pub items: Vec<i32>,
}

impl Track {
    #[must_use]
    pub const fn new(track_type: u8, bin_size: u32) -> Self {
        Self {
            track_type,
            flags: 0,
            bin_size,
            items: Vec::new(),
        }
    }
}

impl StoredObject for Track {
    const KIND: ObjectKind = ObjectKind::Track;

    fn encode(&self, _ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.push(self.track_type);
        out.push(self.flags);
        varint::encode_u32(self.bin_size, out);
        varint::encode_u64(self.items.len() as u64, out);
        let mut last = 0i64;
        for &item in &self.items {
            varint::encode_i64(i64::from(item) - last, out)?;
            last = i64::from(item);
        }
        Ok(())
    }

    fn decode(bytes: &[u8], _ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let track_type = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let bin_size = reader.read_varint_u32()?;
        let count = usize::try_from(reader.read_varint_u64()?)
            .map_err(|_| DecodeError::Corrupt("item count overflow".to_string()))?;

        let mut items = Vec::with_capacity(count.min(reader.remaining()));
        let mut last = 0i64;
        for _ in 0..count {
            let value = last + reader.read_varint_i64()?;
            let item = i32::try_from(value)
                .map_err(|_| DecodeError::Corrupt(format!("track item {value} out of range")))?;
            items.push(item);
            last = value;
        }
        reader.finish()?;

        Ok(Self {
            track_type,
            flags,
            bin_size,
            items,
        })
    }

    cached_variant!(Track);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_roundtrip() {
        let ctx = CodecContext::default();
        let mut track = Track::new(1, 64);
        track.items = vec![0, 5, 12, 12, 3, i32::MIN, i32::MAX, -7];
        let bytes = track.to_bytes(&ctx).expect("encode");
        assert_eq!(Track::decode(&bytes, &ctx).expect("decode"), track);
    }

    #[test]
    fn test_slowly_varying_items_stay_small() {
        let ctx = CodecContext::default();
        let mut track = Track::new(1, 1);
        track.items = (1000..1100).collect();
        let bytes = track.to_bytes(&ctx).expect("encode");
        // Header, a two-byte first item, then one byte per delta.
        assert_eq!(bytes.len(), 2 + 1 + 1 + 2 + 99);
    }

    #[test]
    fn test_track_rejects_missing_items() {
        let ctx = CodecContext::default();
        let bytes = [1, 0, 64, 3, 2];
        assert!(matches!(
            Track::decode(&bytes, &ctx),
            Err(DecodeError::Varint(_))
        ));
    }
}
