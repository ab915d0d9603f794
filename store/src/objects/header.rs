//! The database header record (record #1).
//!
//! Layout: `schema_version, [1B node format], num_contigs, num_seqs,
//! contig_order ref, seq_index ref, contig_index ref`.
//!
//! The header stores its own node format so a reader can tell which wire
//! format every B+Tree node in the database uses before decoding any node.

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::btree::node::NodeFormat;
use crate::storage::codec::{ByteReader, DecodeError, EncodeError, write_record_ref};
use crate::storage::record::RecordId;
use crate::storage::varint;

/// Current header schema.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub schema_version: u32,
    pub node_format: NodeFormat,
    pub num_contigs: u64,
    pub num_seqs: u64,
    /// Record listing contigs in display order.
    pub contig_order: Option<RecordId>,
    /// Root of the sequence-name index.
    pub seq_index: Option<RecordId>,
    /// Root of the contig-name index.
    pub contig_index: Option<RecordId>,
}

impl DatabaseHeader {
    #[must_use]
    pub const fn new(node_format: NodeFormat) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            node_format,
            num_contigs: 0,
            num_seqs: 0,
            contig_order: None,
            seq_index: None,
            contig_index: None,
        }
    }
}

impl StoredObject for DatabaseHeader {
    const KIND: ObjectKind = ObjectKind::Database;

    fn encode(&self, _ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        varint::encode_u32(self.schema_version, out);
        out.push(self.node_format.tag());
        varint::encode_u64(self.num_contigs, out);
        varint::encode_u64(self.num_seqs, out);
        write_record_ref(self.contig_order, out);
        write_record_ref(self.seq_index, out);
        write_record_ref(self.contig_index, out);
        Ok(())
    }

    fn decode(bytes: &[u8], _ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let schema_version = reader.read_varint_u32()?;
        let tag = reader.read_u8()?;
        let node_format = NodeFormat::from_tag(tag)
            .ok_or_else(|| DecodeError::Corrupt(format!("unknown node format {tag}")))?;
        let header = Self {
            schema_version,
            node_format,
            num_contigs: reader.read_varint_u64()?,
            num_seqs: reader.read_varint_u64()?,
            contig_order: reader.read_record_ref()?,
            seq_index: reader.read_record_ref()?,
            contig_index: reader.read_record_ref()?,
        };
        reader.finish()?;
        Ok(header)
    }

    cached_variant!(Database);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let ctx = CodecContext::default();
        let header = DatabaseHeader {
            num_contigs: 3,
            num_seqs: 70_000,
            seq_index: RecordId::from_raw(2),
            contig_index: RecordId::from_raw(3),
            ..DatabaseHeader::new(NodeFormat::Fixed32)
        };
        let bytes = header.to_bytes(&ctx).expect("encode");
        assert_eq!(bytes[1], NodeFormat::Fixed32.tag());
        assert_eq!(DatabaseHeader::decode(&bytes, &ctx).expect("decode"), header);
    }

    #[test]
    fn test_header_rejects_unknown_format() {
        let ctx = CodecContext::default();
        let mut bytes = DatabaseHeader::new(NodeFormat::Varint)
            .to_bytes(&ctx)
            .expect("encode");
        bytes[1] = 9;
        assert!(matches!(
            DatabaseHeader::decode(&bytes, &ctx),
            Err(DecodeError::Corrupt(_))
        ));
    }
}
