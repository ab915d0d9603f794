//! Domain objects stored as records.
//!
//! Every record type implements [`StoredObject`], which pairs an encoder and
//! decoder with the [`CachedObject`] variant that holds it inside a cached
//! item. Dispatch over kinds is a plain `match`, so adding a kind forces every
//! encoder site to handle it.

pub mod bin;
pub mod contig;
pub mod header;
pub mod interface;
pub mod seq;
pub mod track;

pub use bin::{Bin, BinRange};
pub use contig::Contig;
pub use header::DatabaseHeader;
pub use interface::{ObjectError, ObjectInterface};
pub use seq::{Seq, SeqFormat, SeqTech};
pub use track::Track;

use crate::storage::btree::node::{BTreeNode, NodeFormat};
use crate::storage::codec::{DecodeError, EncodeError};

/// Tag naming the type of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Database,
    BTreeNode,
    Contig,
    Bin,
    Track,
    Seq,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Database => "database header",
            Self::BTreeNode => "btree node",
            Self::Contig => "contig",
            Self::Bin => "bin",
            Self::Track => "track",
            Self::Seq => "sequence",
        };
        f.write_str(name)
    }
}

/// Settings that change how records are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecContext {
    pub node_format: NodeFormat,
}

/// A decoded record held inline by a cached item.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedObject {
    Database(DatabaseHeader),
    BTreeNode(BTreeNode),
    Contig(Contig),
    Bin(Bin),
    Track(Track),
    Seq(Seq),
}

impl CachedObject {
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Database(_) => ObjectKind::Database,
            Self::BTreeNode(_) => ObjectKind::BTreeNode,
            Self::Contig(_) => ObjectKind::Contig,
            Self::Bin(_) => ObjectKind::Bin,
            Self::Track(_) => ObjectKind::Track,
            Self::Seq(_) => ObjectKind::Seq,
        }
    }

    /// Encode through the type-specific encoder.
    pub fn encode(&self, ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            Self::Database(obj) => obj.encode(ctx, out),
            Self::BTreeNode(obj) => obj.encode(ctx, out),
            Self::Contig(obj) => obj.encode(ctx, out),
            Self::Bin(obj) => obj.encode(ctx, out),
            Self::Track(obj) => obj.encode(ctx, out),
            Self::Seq(obj) => obj.encode(ctx, out),
        }
    }

    /// Decode a record image as the given kind.
    pub fn decode(kind: ObjectKind, bytes: &[u8], ctx: &CodecContext) -> Result<Self, DecodeError> {
        Ok(match kind {
            ObjectKind::Database => Self::Database(DatabaseHeader::decode(bytes, ctx)?),
            ObjectKind::BTreeNode => Self::BTreeNode(BTreeNode::decode(bytes, ctx)?),
            ObjectKind::Contig => Self::Contig(Contig::decode(bytes, ctx)?),
            ObjectKind::Bin => Self::Bin(Bin::decode(bytes, ctx)?),
            ObjectKind::Track => Self::Track(Track::decode(bytes, ctx)?),
            ObjectKind::Seq => Self::Seq(Seq::decode(bytes, ctx)?),
        })
    }
}

/// A record type with a compact on-disk encoding.
pub trait StoredObject: Sized {
    const KIND: ObjectKind;

    /// Append the encoded image to `out`.
    fn encode(&self, ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// Decode a complete record image.
    fn decode(bytes: &[u8], ctx: &CodecContext) -> Result<Self, DecodeError>;

    fn into_object(self) -> CachedObject;

    fn from_object(object: &CachedObject) -> Option<&Self>;

    fn from_object_mut(object: &mut CachedObject) -> Option<&mut Self>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self, ctx: &CodecContext) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.encode(ctx, &mut out)?;
        Ok(out)
    }
}

/// Implement the `CachedObject` conversions for a record type.
macro_rules! cached_variant {
    ($variant:ident) => {
        fn into_object(self) -> $crate::objects::CachedObject {
            $crate::objects::CachedObject::$variant(self)
        }

        fn from_object(object: &$crate::objects::CachedObject) -> Option<&Self> {
            match object {
                $crate::objects::CachedObject::$variant(obj) => Some(obj),
                _ => None,
            }
        }

        fn from_object_mut(object: &mut $crate::objects::CachedObject) -> Option<&mut Self> {
            match object {
                $crate::objects::CachedObject::$variant(obj) => Some(obj),
                _ => None,
            }
        }
    };
}

pub(crate) use cached_variant;
