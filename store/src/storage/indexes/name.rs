//! Name indices: sequence name and contig name to record id.

use std::str::FromStr;

use crate::objects::DatabaseHeader;
use crate::storage::record::RecordId;

/// The indices a database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    SequenceName,
    ContigName,
}

impl IndexKind {
    pub const ALL: [Self; 2] = [Self::SequenceName, Self::ContigName];

    /// Root node recorded in the header.
    #[must_use]
    pub const fn root(self, header: &DatabaseHeader) -> Option<RecordId> {
        match self {
            Self::SequenceName => header.seq_index,
            Self::ContigName => header.contig_index,
        }
    }

    pub const fn set_root(self, header: &mut DatabaseHeader, root: RecordId) {
        match self {
            Self::SequenceName => header.seq_index = Some(root),
            Self::ContigName => header.contig_index = Some(root),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SequenceName => write!(f, "seq"),
            Self::ContigName => write!(f, "contig"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIndexError(String);

impl std::fmt::Display for ParseIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown index {:?}, expected seq or contig", self.0)
    }
}

impl std::error::Error for ParseIndexError {}

impl FromStr for IndexKind {
    type Err = ParseIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seq" | "sequence" => Ok(Self::SequenceName),
            "contig" => Ok(Self::ContigName),
            other => Err(ParseIndexError(other.to_string())),
        }
    }
}
