//! Record store abstraction.
//!
//! This module provides the `RecordStore` trait, the connection-level
//! interface every object-store binding sits on. Two implementations exist:
//! the persistent `DatabaseFile` and the in-memory `MemoryStore` used for
//! deterministic tests with fault injection.
//!
//! # Contract
//!
//! - A record is addressed by `RecordId` and accessed through a `View`
//!   obtained from `lock`.
//! - `write_raw` stages bytes on the view; `flush` makes them the record's
//!   committed image; `abandon` discards them.
//! - `unlock` flushes any staged bytes and releases the lock.
//! - `sync` makes all flushed images durable.

use crate::storage::record::{LockMode, RecordId, RecordInfo, View};

/// Errors that can occur during record store operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// The record id was never allocated or has been destroyed.
    RecordNotFound(RecordId),
    /// The view is not open on this store.
    UnknownView(View),
    /// Another view holds a conflicting lock.
    LockConflict { rec: RecordId, requested: LockMode },
    /// The view's lock mode does not allow writing.
    NotWritable(View),
    /// Stored data failed validation.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::RecordNotFound(rec) => write!(f, "record {rec} not found"),
            Self::UnknownView(view) => write!(f, "{view} is not open"),
            Self::LockConflict { rec, requested } => {
                write!(f, "cannot lock record {rec} for {requested}: held elsewhere")
            }
            Self::NotWritable(view) => write!(f, "{view} is not locked for writing"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl StorageError {
    /// Whether the error is a lock conflict the caller may retry.
    #[must_use]
    pub const fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }
}

/// Abstraction over record-oriented storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_raw` returns staged bytes for the view if any, else the last
///   flushed image
/// - `write_raw` fails with `NotWritable` unless the view is `ReadWrite`
/// - lock conflicts are reported, never waited on
pub trait RecordStore {
    // ========== Records ==========

    /// Allocate a fresh, empty record.
    fn allocate_record_id(&mut self) -> Result<RecordId, StorageError>;

    /// Destroy a record. The view must hold it `ReadWrite` and is closed.
    fn destroy(&mut self, rec: RecordId, view: View) -> Result<(), StorageError>;

    // ========== Locking ==========

    /// Open a view on a record with the requested lock.
    fn lock(&mut self, rec: RecordId, mode: LockMode) -> Result<View, StorageError>;

    /// Flush staged bytes and close the view.
    fn unlock(&mut self, view: View) -> Result<(), StorageError>;

    /// Strengthen the lock held by a view in place.
    fn upgrade(&mut self, view: View, mode: LockMode) -> Result<(), StorageError>;

    /// Discard staged bytes and close the view.
    fn abandon(&mut self, view: View) -> Result<(), StorageError>;

    // ========== Data ==========

    /// Read the image visible through a view.
    fn read_raw(&mut self, view: View) -> Result<Vec<u8>, StorageError>;

    /// Stage a new image on a view.
    fn write_raw(&mut self, view: View, bytes: &[u8]) -> Result<(), StorageError>;

    /// Commit the staged image of a view to the store.
    fn flush(&mut self, view: View) -> Result<(), StorageError>;

    /// Size metadata for a view.
    fn info(&self, view: View) -> Result<RecordInfo, StorageError>;

    /// Make all flushed images durable.
    fn sync(&mut self) -> Result<(), StorageError>;
}
