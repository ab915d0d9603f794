//! B+Tree node structure and on-disk encoding.
//!
//! # Layout
//!
//! ```text
//! [1B leaf][2B used BE][parent][next][used x child]
//! [used x 1B prefix len][used x 1B suffix len][suffix bytes]
//! ```
//!
//! References are 4-byte big-endian in `NodeFormat::Fixed32` and varints in
//! `NodeFormat::Varint`, with zero meaning "none". Each key is stored as the
//! length of the prefix it shares with the previous key plus the remaining
//! suffix.
//!
//! # Invariants
//!
//! - `keys.len() == chld.len()`
//! - Keys are non-decreasing
//! - Every key is at most `MAX_KEY_LEN` bytes

#![allow(clippy::cast_possible_truncation)]

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::codec::{ByteReader, DecodeError, EncodeError, write_record_ref};
use crate::storage::record::RecordId;

/// Longest key a node can store; prefix and suffix lengths are single bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Wire format for record references inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeFormat {
    /// 32-bit big-endian references (the legacy layout).
    Fixed32,
    /// Varint references, wide enough for 64-bit record ids.
    #[default]
    Varint,
}

impl NodeFormat {
    /// Format byte stored in the database header.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Fixed32 => 1,
            Self::Varint => 2,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Fixed32),
            2 => Some(Self::Varint),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed32 => write!(f, "fixed32"),
            Self::Varint => write!(f, "varint"),
        }
    }
}

/// A decoded B+Tree node.
///
/// In a leaf, `chld[i]` is the record indexed under `keys[i]`. In an
/// internal node, `chld[i]` is a child node and `keys[i]` is the largest key
/// reachable through it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BTreeNode {
    pub leaf: bool,
    pub keys: Vec<String>,
    pub chld: Vec<RecordId>,
    pub parent: Option<RecordId>,
    /// Right sibling at the same level.
    pub next: Option<RecordId>,
}

impl BTreeNode {
    #[must_use]
    pub const fn new(leaf: bool) -> Self {
        Self {
            leaf,
            keys: Vec::new(),
            chld: Vec::new(),
            parent: None,
            next: None,
        }
    }

    /// Number of entries in use.
    #[must_use]
    pub fn used(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Largest key in the node.
    #[must_use]
    pub fn max_key(&self) -> Option<&str> {
        self.keys.last().map(String::as_str)
    }

    /// Index of the first key `>= key`, or `used()` if there is none.
    #[must_use]
    pub fn lower_bound(&self, key: &str) -> usize {
        self.keys.partition_point(|k| k.as_str() < key)
    }

    /// Index of the first key `> key`.
    #[must_use]
    pub fn upper_bound(&self, key: &str) -> usize {
        self.keys.partition_point(|k| k.as_str() <= key)
    }

    /// Position of `child` in this node.
    #[must_use]
    pub fn child_index(&self, child: RecordId) -> Option<usize> {
        self.chld.iter().position(|&c| c == child)
    }

    pub fn insert_at(&mut self, index: usize, key: String, child: RecordId) {
        self.keys.insert(index, key);
        self.chld.insert(index, child);
    }

    pub fn remove_at(&mut self, index: usize) -> (String, RecordId) {
        (self.keys.remove(index), self.chld.remove(index))
    }

    /// Move entries `at..` into a new vector pair, leaving `..at` here.
    pub fn split_off(&mut self, at: usize) -> (Vec<String>, Vec<RecordId>) {
        (self.keys.split_off(at), self.chld.split_off(at))
    }
}

fn write_ref(rec: Option<RecordId>, format: NodeFormat, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match format {
        NodeFormat::Fixed32 => {
            let raw = rec.map_or(0, RecordId::get);
            let raw = u32::try_from(raw).map_err(|_| EncodeError::RecordOutOfRange(RecordId(raw)))?;
            out.extend_from_slice(&raw.to_be_bytes());
        }
        NodeFormat::Varint => write_record_ref(rec, out),
    }
    Ok(())
}

fn read_ref(reader: &mut ByteReader<'_>, format: NodeFormat) -> Result<Option<RecordId>, DecodeError> {
    match format {
        NodeFormat::Fixed32 => Ok(RecordId::from_raw(u64::from(reader.read_u32_be()?))),
        NodeFormat::Varint => reader.read_record_ref(),
    }
}

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl StoredObject for BTreeNode {
    const KIND: ObjectKind = ObjectKind::BTreeNode;

    fn encode(&self, ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let used = self.keys.len();
        if self.chld.len() != used {
            return Err(EncodeError::LengthMismatch {
                field: "chld",
                expected: used,
                actual: self.chld.len(),
            });
        }
        let used_u16 = u16::try_from(used).map_err(|_| EncodeError::TooManyEntries(used))?;
        if let Some(key) = self.keys.iter().find(|k| k.len() > MAX_KEY_LEN) {
            return Err(EncodeError::KeyTooLong(key.len()));
        }

        out.push(u8::from(self.leaf));
        out.extend_from_slice(&used_u16.to_be_bytes());
        write_ref(self.parent, ctx.node_format, out)?;
        write_ref(self.next, ctx.node_format, out)?;
        for &child in &self.chld {
            write_ref(Some(child), ctx.node_format, out)?;
        }

        let mut prefixes = Vec::with_capacity(used);
        let mut prev: &[u8] = &[];
        for key in &self.keys {
            let prefix = shared_prefix(prev, key.as_bytes());
            prefixes.push(prefix);
            prev = key.as_bytes();
        }
        // Lengths fit a byte because every key is at most MAX_KEY_LEN.
        out.extend(prefixes.iter().map(|&p| p as u8));
        out.extend(
            self.keys
                .iter()
                .zip(&prefixes)
                .map(|(key, &p)| (key.len() - p) as u8),
        );
        for (key, &p) in self.keys.iter().zip(&prefixes) {
            out.extend_from_slice(&key.as_bytes()[p..]);
        }
        Ok(())
    }

    fn decode(bytes: &[u8], ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let leaf = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(DecodeError::Corrupt(format!("invalid leaf flag {other}"))),
        };
        let used = usize::from(reader.read_u16_be()?);
        let parent = read_ref(&mut reader, ctx.node_format)?;
        let next = read_ref(&mut reader, ctx.node_format)?;

        // Each entry needs at least a one-byte child and two length bytes.
        if used * 3 > reader.remaining() {
            return Err(DecodeError::Corrupt(format!(
                "used count {used} exceeds the {} bytes left",
                reader.remaining()
            )));
        }

        let mut chld = Vec::with_capacity(used);
        for _ in 0..used {
            let child = read_ref(&mut reader, ctx.node_format)?
                .ok_or_else(|| DecodeError::Corrupt("node entry without a child".to_string()))?;
            chld.push(child);
        }
        let prefixes = reader.read_bytes(used)?;
        let suffixes = reader.read_bytes(used)?;

        let mut keys: Vec<String> = Vec::with_capacity(used);
        let mut prev: Vec<u8> = Vec::new();
        for (&p, &s) in prefixes.iter().zip(suffixes) {
            let p = usize::from(p);
            if p > prev.len() {
                return Err(DecodeError::Corrupt(format!(
                    "shared prefix {p} longer than previous key"
                )));
            }
            let mut key = prev[..p].to_vec();
            key.extend_from_slice(reader.read_bytes(usize::from(s))?);
            if key.len() > MAX_KEY_LEN {
                return Err(DecodeError::Corrupt(format!("key of {} bytes", key.len())));
            }
            let text = String::from_utf8(key.clone()).map_err(|_| DecodeError::InvalidUtf8)?;
            keys.push(text);
            prev = key;
        }
        reader.finish()?;

        Ok(Self {
            leaf,
            keys,
            chld,
            parent,
            next,
        })
    }

    cached_variant!(BTreeNode);
}
