//! Bin records.
//!
//! A bin covers a region of a contig and lists the ranges (placed sequences,
//! annotations) inside it. Bins form a binary tree through `child`.
//!
//! # Layout
//!
//! ```text
//! pos (signed), size, start_used (signed), end_used (signed), parent ref,
//! [1B parent_type], child[0] ref, child[1] ref, track ref, [1B flags],
//! nseqs, range count, ranges...
//! ```
//!
//! Each range is `start delta (signed), len (signed), rec, [1B mqual],
//! pair ref, [1B flags]`, with `start` stored relative to the previous range.

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::codec::{ByteReader, DecodeError, EncodeError, write_record_ref};
use crate::storage::record::RecordId;
use crate::storage::varint;

/// One item placed in a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRange {
    /// Start relative to the bin position.
    pub start: i32,
    /// Signed extent; negative when complemented.
    pub len: i32,
    pub rec: RecordId,
    pub mqual: u8,
    pub pair: Option<RecordId>,
    pub flags: u8,
}

impl BinRange {
    /// Inclusive end position.
    #[must_use]
    pub const fn end(&self) -> i64 {
        self.start as i64 + self.len.unsigned_abs() as i64 - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bin {
    pub pos: i32,
    pub size: u32,
    pub start_used: i32,
    pub end_used: i32,
    pub parent: Option<RecordId>,
    pub parent_type: u8,
    pub child: [Option<RecordId>; 2],
    pub track: Option<RecordId>,
    pub flags: u8,
    pub nseqs: u32,
    pub ranges: Vec<BinRange>,
}

impl Bin {
    /// An empty bin covering `size` positions from `pos`.
    #[must_use]
    pub fn new(pos: i32, size: u32) -> Self {
        Self {
            pos,
            size,
            ..Self::default()
        }
    }

    /// Add a range and widen the used extent to include it.
    pub fn add_range(&mut self, range: BinRange) {
        let end = i32::try_from(range.end()).unwrap_or(i32::MAX);
        if self.ranges.is_empty() {
            self.start_used = range.start;
            self.end_used = end;
        } else {
            self.start_used = self.start_used.min(range.start);
            self.end_used = self.end_used.max(end);
        }
        self.ranges.push(range);
    }
}

impl StoredObject for Bin {
    const KIND: ObjectKind = ObjectKind::Bin;

    fn encode(&self, _ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        varint::encode_i32(self.pos, out);
        varint::encode_u32(self.size, out);
        varint::encode_i32(self.start_used, out);
        varint::encode_i32(self.end_used, out);
        write_record_ref(self.parent, out);
        out.push(self.parent_type);
        write_record_ref(self.child[0], out);
        write_record_ref(self.child[1], out);
        write_record_ref(self.track, out);
        out.push(self.flags);
        varint::encode_u32(self.nseqs, out);
        varint::encode_u64(self.ranges.len() as u64, out);

        let mut last = 0i64;
        for range in &self.ranges {
            varint::encode_i64(i64::from(range.start) - last, out)?;
            last = i64::from(range.start);
            varint::encode_i32(range.len, out);
            write_record_ref(Some(range.rec), out);
            out.push(range.mqual);
            write_record_ref(range.pair, out);
            out.push(range.flags);
        }
        Ok(())
    }

    fn decode(bytes: &[u8], _ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let mut bin = Self {
            pos: reader.read_varint_i32()?,
            size: reader.read_varint_u32()?,
            start_used: reader.read_varint_i32()?,
            end_used: reader.read_varint_i32()?,
            parent: reader.read_record_ref()?,
            parent_type: reader.read_u8()?,
            child: [reader.read_record_ref()?, reader.read_record_ref()?],
            track: reader.read_record_ref()?,
            flags: reader.read_u8()?,
            nseqs: reader.read_varint_u32()?,
            ranges: Vec::new(),
        };

        let count = usize::try_from(reader.read_varint_u64()?)
            .map_err(|_| DecodeError::Corrupt("range count overflow".to_string()))?;
        // Every range takes at least six bytes.
        bin.ranges.reserve(count.min(reader.remaining() / 6));
        let mut last = 0i64;
        for _ in 0..count {
            let start = last + reader.read_varint_i64()?;
            let start = i32::try_from(start)
                .map_err(|_| DecodeError::Corrupt(format!("range start {start} out of range")))?;
            last = i64::from(start);
            let len = reader.read_varint_i32()?;
            let rec = reader
                .read_record_ref()?
                .ok_or_else(|| DecodeError::Corrupt("range without a record".to_string()))?;
            bin.ranges.push(BinRange {
                start,
                len,
                rec,
                mqual: reader.read_u8()?,
                pair: reader.read_record_ref()?,
                flags: reader.read_u8()?,
            });
        }
        reader.finish()?;
        Ok(bin)
    }

    cached_variant!(Bin);
}
