//! Contig records.
//!
//! Layout: `start (signed), end (signed), bin ref, nseqs, name\0`.

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::codec::{ByteReader, DecodeError, EncodeError, write_cstr, write_record_ref};
use crate::storage::record::RecordId;
use crate::storage::varint;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Contig {
    /// Leftmost used position.
    pub start: i32,
    /// Rightmost used position.
    pub end: i32,
    /// Root bin of the contig's bin tree.
    pub bin: Option<RecordId>,
    pub nseqs: u32,
    pub name: String,
}

impl Contig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of positions spanned, inclusive.
    #[must_use]
    pub const fn length(&self) -> i64 {
        self.end as i64 - self.start as i64 + 1
    }
}

impl StoredObject for Contig {
    const KIND: ObjectKind = ObjectKind::Contig;

    fn encode(&self, _ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        varint::encode_i32(self.start, out);
        varint::encode_i32(self.end, out);
        write_record_ref(self.bin, out);
        varint::encode_u32(self.nseqs, out);
        write_cstr(&self.name, out)
    }

    fn decode(bytes: &[u8], _ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let contig = Self {
            start: reader.read_varint_i32()?,
            end: reader.read_varint_i32()?,
            bin: reader.read_record_ref()?,
            nseqs: reader.read_varint_u32()?,
            name: reader.read_cstr()?,
        };
        reader.finish()?;
        Ok(contig)
    }

    cached_variant!(Contig);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contig_roundtrip() {
        let ctx = CodecContext::default();
        let contig = Contig {
            start: -20,
            end: 15_000,
            bin: RecordId::from_raw(7),
            nseqs: 312,
            name: "contig00001".to_string(),
        };
        let bytes = contig.to_bytes(&ctx).expect("encode");
        assert_eq!(Contig::decode(&bytes, &ctx).expect("decode"), contig);
        assert_eq!(contig.length(), 15_021);
    }

    #[test]
    fn test_contig_rejects_truncation() {
        let ctx = CodecContext::default();
        let bytes = Contig::new("c1").to_bytes(&ctx).expect("encode");
        assert!(Contig::decode(&bytes[..bytes.len() - 1], &ctx).is_err());
    }
}
