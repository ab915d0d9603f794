//! Assembly record storage engine.
//!
//! # File Format
//!
//! The database is a single file:
//!
//! - Bytes 0-63: superblock (magic, version, next record id, log end)
//! - Remaining bytes: an append-only log of CRC-protected record frames
//!
//! # Usage
//!
//! ```ignore
//! use storage::{DatabaseFile, RecordStore, LockMode};
//!
//! let mut file = DatabaseFile::create(path)?;
//! let rec = file.allocate_record_id()?;
//! let view = file.lock(rec, LockMode::ReadWrite)?;
//! file.write_raw(view, b"hello")?;
//! file.unlock(view)?;
//! file.sync()?;
//! ```

pub mod btree;
pub mod cache;
pub mod codec;
pub mod file;
pub mod indexes;
pub mod io;
pub mod lock;
pub mod memory;
pub mod record;
pub mod superblock;
pub mod varint;

pub use file::{DatabaseFile, FileError};
pub use io::{RecordStore, StorageError};
pub use memory::{FaultConfig, MemoryStore};
pub use record::{LockMode, RecordId, RecordInfo, View};
