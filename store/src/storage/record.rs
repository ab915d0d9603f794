//! Record identifiers, views and lock modes.

/// A stable handle naming a persisted record, independent of where its bytes
/// live. Zero is reserved as the on-disk "no record" marker, so a `RecordId`
/// is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub(crate) u64);

impl RecordId {
    /// The database header record.
    pub const HEADER: Self = Self(1);

    /// First record id handed out by a fresh store.
    pub const FIRST: Self = Self(1);

    /// Convert a raw on-disk value, mapping zero to `None`.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id allocated after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A lock-scoped handle on a record, returned by `lock()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View(pub(crate) u64);

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view {}", self.0)
    }
}

/// Lock strength held through a view. Ordered so `mode >= LockMode::Read`
/// reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockMode {
    /// A handle without a lock; reads may observe concurrent writers.
    #[default]
    None,
    /// Shared read lock.
    Read,
    /// Exclusive read-write lock.
    ReadWrite,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Read => write!(f, "read"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Size metadata returned by `info()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub rec: RecordId,
    pub mode: LockMode,
    /// Length of the image the view currently sees, including uncommitted writes.
    pub length: usize,
}
