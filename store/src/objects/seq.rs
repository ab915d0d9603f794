//! Sequence records.
//!
//! # Layout
//!
//! Varints unless noted:
//!
//! ```text
//! bin, left, right, len (signed), other_end, parent,
//! [1B parent_type][1B format | flags << 2 | tech << 5][1B mapping_qual],
//! name\0, trace_name\0, alignment\0, payload
//! ```
//!
//! The payload depends on [`SeqFormat`]:
//!
//! - `Packed`: one byte per base, `code | conf << 2` with `code` in ACGT order
//!   and `conf` clamped to 0-63.
//! - `Compressed`: three bases per byte as `c0 * 36 + c1 * 6 + c2` over
//!   `ACGTN*`, then run-length coded confidence (see [`encode_conf_rle`]).
//! - `FourChannel`: bases verbatim, then four confidence bytes per base.
//!
//! # Invariants
//!
//! - `len.unsigned_abs() == seq.len()`; a negative `len` means the read is
//!   complemented
//! - `conf.len() == seq.len() * format.conf_per_base()`

use crate::objects::{CodecContext, ObjectKind, StoredObject, cached_variant};
use crate::storage::codec::{ByteReader, DecodeError, EncodeError, write_cstr, write_record_ref};
use crate::storage::record::RecordId;
use crate::storage::varint;

/// Largest confidence a `Packed` base can hold.
pub const PACKED_MAX_CONF: u8 = 63;

/// Longest run a single run-length triple describes.
pub const MAX_CONF_RUN: usize = 257;

const COMPRESSED_ALPHABET: [u8; 6] = *b"ACGTN*";

/// How bases and confidence values are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeqFormat {
    /// 2-bit base plus 6-bit confidence per byte.
    #[default]
    Packed,
    /// Base-6 packed bases with run-length coded confidence.
    Compressed,
    /// Verbatim bases with per-channel confidence.
    FourChannel,
}

impl SeqFormat {
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Packed => 0,
            Self::Compressed => 1,
            Self::FourChannel => 2,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Packed),
            1 => Some(Self::Compressed),
            2 => Some(Self::FourChannel),
            _ => None,
        }
    }

    /// Confidence bytes stored per base.
    #[must_use]
    pub const fn conf_per_base(self) -> usize {
        match self {
            Self::Packed | Self::Compressed => 1,
            Self::FourChannel => 4,
        }
    }
}

/// Sequencing technology that produced a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeqTech {
    #[default]
    Unknown,
    Sanger,
    Solexa,
    Solid,
    Roche454,
    Helicos,
    IonTorrent,
    PacBio,
}

impl SeqTech {
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Sanger => 1,
            Self::Solexa => 2,
            Self::Solid => 3,
            Self::Roche454 => 4,
            Self::Helicos => 5,
            Self::IonTorrent => 6,
            Self::PacBio => 7,
        }
    }

    /// Every 3-bit value names a technology.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        match tag & 0x07 {
            1 => Self::Sanger,
            2 => Self::Solexa,
            3 => Self::Solid,
            4 => Self::Roche454,
            5 => Self::Helicos,
            6 => Self::IonTorrent,
            7 => Self::PacBio,
            _ => Self::Unknown,
        }
    }
}

/// A decoded sequence record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Seq {
    pub bin: Option<RecordId>,
    /// First base of the good (unclipped) region, 1-based.
    pub left: u32,
    /// Last base of the good region.
    pub right: u32,
    /// Base count; negative when complemented.
    pub len: i32,
    /// The other read of a pair.
    pub other_end: Option<RecordId>,
    pub parent: Option<RecordId>,
    pub parent_type: u8,
    pub format: SeqFormat,
    /// Three flag bits.
    pub flags: u8,
    pub tech: SeqTech,
    pub mapping_qual: u8,
    pub name: String,
    pub trace_name: String,
    pub alignment: String,
    pub seq: Vec<u8>,
    pub conf: Vec<u8>,
}

impl Seq {
    /// Largest value `flags` can hold.
    pub const MAX_FLAGS: u8 = 0x07;

    /// A forward read with the whole sequence unclipped.
    pub fn new(
        name: impl Into<String>,
        seq: Vec<u8>,
        conf: Vec<u8>,
        format: SeqFormat,
    ) -> Result<Self, EncodeError> {
        let len = i32::try_from(seq.len()).map_err(|_| EncodeError::FieldOutOfRange {
            field: "len",
            value: seq.len() as u64,
        })?;
        let right = len.unsigned_abs();
        let seq = Self {
            left: 1,
            right,
            len,
            format,
            name: name.into(),
            seq,
            conf,
            ..Self::default()
        };
        seq.validate()?;
        Ok(seq)
    }

    /// Number of bases.
    #[must_use]
    pub const fn base_count(&self) -> usize {
        self.len.unsigned_abs() as usize
    }

    #[must_use]
    pub const fn is_complemented(&self) -> bool {
        self.len < 0
    }

    /// Check the length invariants.
    pub fn validate(&self) -> Result<(), EncodeError> {
        let n = self.base_count();
        if self.seq.len() != n {
            return Err(EncodeError::LengthMismatch {
                field: "seq",
                expected: n,
                actual: self.seq.len(),
            });
        }
        let expected = n * self.format.conf_per_base();
        if self.conf.len() != expected {
            return Err(EncodeError::LengthMismatch {
                field: "conf",
                expected,
                actual: self.conf.len(),
            });
        }
        if self.flags > Self::MAX_FLAGS {
            return Err(EncodeError::FieldOutOfRange {
                field: "flags",
                value: u64::from(self.flags),
            });
        }
        Ok(())
    }

    fn packed_byte(&self) -> u8 {
        self.format.tag() | (self.flags << 2) | (self.tech.tag() << 5)
    }
}

impl StoredObject for Seq {
    const KIND: ObjectKind = ObjectKind::Seq;

    fn encode(&self, _ctx: &CodecContext, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.validate()?;

        write_record_ref(self.bin, out);
        varint::encode_u32(self.left, out);
        varint::encode_u32(self.right, out);
        varint::encode_i32(self.len, out);
        write_record_ref(self.other_end, out);
        write_record_ref(self.parent, out);
        out.push(self.parent_type);
        out.push(self.packed_byte());
        out.push(self.mapping_qual);
        write_cstr(&self.name, out)?;
        write_cstr(&self.trace_name, out)?;
        write_cstr(&self.alignment, out)?;

        match self.format {
            SeqFormat::Packed => encode_packed(&self.seq, &self.conf, out),
            SeqFormat::Compressed => {
                encode_bases_base6(&self.seq, out);
                encode_conf_rle(&self.conf, out);
                Ok(())
            }
            SeqFormat::FourChannel => {
                out.extend_from_slice(&self.seq);
                out.extend_from_slice(&self.conf);
                Ok(())
            }
        }
    }

    fn decode(bytes: &[u8], _ctx: &CodecContext) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);

        let bin = reader.read_record_ref()?;
        let left = reader.read_varint_u32()?;
        let right = reader.read_varint_u32()?;
        let len = reader.read_varint_i32()?;
        let other_end = reader.read_record_ref()?;
        let parent = reader.read_record_ref()?;
        let parent_type = reader.read_u8()?;
        let packed = reader.read_u8()?;
        let format = SeqFormat::from_tag(packed & 0x03)
            .ok_or_else(|| DecodeError::Corrupt(format!("unknown sequence format {}", packed & 0x03)))?;
        let mapping_qual = reader.read_u8()?;
        let name = reader.read_cstr()?;
        let trace_name = reader.read_cstr()?;
        let alignment = reader.read_cstr()?;

        let n = len.unsigned_abs() as usize;
        let (seq, conf) = match format {
            SeqFormat::Packed => decode_packed(&mut reader, n)?,
            SeqFormat::Compressed => {
                let seq = decode_bases_base6(&mut reader, n)?;
                let conf = decode_conf_rle(&mut reader, n)?;
                (seq, conf)
            }
            SeqFormat::FourChannel => {
                let seq = reader.read_bytes(n)?.to_vec();
                let conf_len = n
                    .checked_mul(4)
                    .ok_or_else(|| DecodeError::Corrupt("sequence length overflow".to_string()))?;
                let conf = reader.read_bytes(conf_len)?.to_vec();
                (seq, conf)
            }
        };
        reader.finish()?;

        Ok(Self {
            bin,
            left,
            right,
            len,
            other_end,
            parent,
            parent_type,
            format,
            flags: (packed >> 2) & Self::MAX_FLAGS,
            tech: SeqTech::from_tag(packed >> 5),
            mapping_qual,
            name,
            trace_name,
            alignment,
            seq,
            conf,
        })
    }

    cached_variant!(Seq);
}

const fn packed_code(base: u8) -> Option<u8> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

fn encode_packed(seq: &[u8], conf: &[u8], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.reserve(seq.len());
    for (&base, &q) in seq.iter().zip(conf) {
        let code = packed_code(base).ok_or(EncodeError::UnrepresentableBase(base))?;
        out.push(code | (q.min(PACKED_MAX_CONF) << 2));
    }
    Ok(())
}

fn decode_packed(reader: &mut ByteReader<'_>, n: usize) -> Result<(Vec<u8>, Vec<u8>), DecodeError> {
    let bytes = reader.read_bytes(n)?;
    let seq = bytes.iter().map(|&b| b"ACGT"[usize::from(b & 0x03)]).collect();
    let conf = bytes.iter().map(|&b| b >> 2).collect();
    Ok((seq, conf))
}

/// Index of a base in the base-6 alphabet. Lowercase folds to uppercase and
/// anything unknown becomes `N`.
const fn base6_code(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        b'*' => 5,
        _ => 4,
    }
}

/// Pack bases three per byte. A short final group is padded with `A`.
pub fn encode_bases_base6(seq: &[u8], out: &mut Vec<u8>) {
    out.reserve(seq.len().div_ceil(3));
    for group in seq.chunks(3) {
        let mut codes = [0u8; 3];
        for (slot, &base) in codes.iter_mut().zip(group) {
            *slot = base6_code(base);
        }
        out.push(codes[0] * 36 + codes[1] * 6 + codes[2]);
    }
}

pub fn decode_bases_base6(reader: &mut ByteReader<'_>, n: usize) -> Result<Vec<u8>, DecodeError> {
    let bytes = reader.read_bytes(n.div_ceil(3))?;
    let mut seq = Vec::with_capacity(n);
    for &byte in bytes {
        if byte >= 216 {
            return Err(DecodeError::Corrupt(format!("invalid base triplet {byte}")));
        }
        for code in [byte / 36, (byte / 6) % 6, byte % 6] {
            if seq.len() < n {
                seq.push(COMPRESSED_ALPHABET[usize::from(code)]);
            }
        }
    }
    Ok(seq)
}

/// Run-length code a confidence array.
///
/// A lone value is written once. A run of 2 to 257 equal values is written as
/// the value twice followed by `run - 2`. Longer runs are split into chunks
/// of at most 257, so a run of 258 becomes a full triple plus a lone value.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_conf_rle(conf: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < conf.len() {
        let value = conf[i];
        let mut run = conf[i..].iter().take_while(|&&q| q == value).count();
        i += run;
        while run > 0 {
            if run == 1 {
                out.push(value);
                break;
            }
            let chunk = run.min(MAX_CONF_RUN);
            // chunk - 2 is at most 255.
            out.extend_from_slice(&[value, value, (chunk - 2) as u8]);
            run -= chunk;
        }
    }
}

/// Decode `n` run-length coded confidence values.
pub fn decode_conf_rle(reader: &mut ByteReader<'_>, n: usize) -> Result<Vec<u8>, DecodeError> {
    let mut conf = Vec::with_capacity(n.min(reader.remaining().saturating_mul(MAX_CONF_RUN)));
    while conf.len() < n {
        let value = reader.read_u8()?;
        if conf.len() + 1 < n && reader.peek_u8() == Some(value) {
            reader.read_u8()?;
            let run = usize::from(reader.read_u8()?) + 2;
            if conf.len() + run > n {
                return Err(DecodeError::Corrupt(format!(
                    "confidence run of {run} overflows {n} bases"
                )));
            }
            conf.resize(conf.len() + run, value);
        } else {
            conf.push(value);
        }
    }
    Ok(conf)
}
