//! Cached items: one decoded record plus the lock it was read under.

use crate::objects::interface::ObjectError;
use crate::objects::{CachedObject, ObjectKind, StoredObject};
use crate::storage::cache::table::SlotKey;
use crate::storage::io::StorageError;
use crate::storage::record::{LockMode, RecordId, View};

/// Envelope owning exactly one decoded record.
///
/// The payload is stored inline as a [`CachedObject`] variant. `length` and
/// `checksum` describe the image last read from or written to the store.
#[derive(Debug, Clone)]
pub struct CachedItem {
    pub(crate) rec: RecordId,
    pub(crate) view: View,
    pub(crate) mode: LockMode,
    pub(crate) dirty: bool,
    pub(crate) slot: Option<SlotKey>,
    pub(crate) length: usize,
    pub(crate) checksum: u32,
    pub(crate) object: CachedObject,
}

impl CachedItem {
    /// Wrap a decoded object. The item is clean and not yet in any table.
    #[must_use]
    pub const fn create(
        object: CachedObject,
        rec: RecordId,
        view: View,
        mode: LockMode,
        length: usize,
    ) -> Self {
        Self {
            rec,
            view,
            mode,
            dirty: false,
            slot: None,
            length,
            checksum: 0,
            object,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.object.kind()
    }

    #[must_use]
    pub const fn rec(&self) -> RecordId {
        self.rec
    }

    #[must_use]
    pub const fn view(&self) -> View {
        self.view
    }

    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Table slot holding the item, once inserted.
    #[must_use]
    pub const fn slot(&self) -> Option<SlotKey> {
        self.slot
    }

    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    /// CRC32 of the last image seen for this record.
    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    #[must_use]
    pub const fn object(&self) -> &CachedObject {
        &self.object
    }

    /// Typed access to the payload.
    pub fn get<T: StoredObject>(&self) -> Result<&T, ObjectError> {
        T::from_object(&self.object).ok_or(ObjectError::WrongKind {
            rec: self.rec,
            expected: T::KIND,
            found: self.object.kind(),
        })
    }

    /// Typed mutable access. Only items held `ReadWrite` may be changed.
    pub fn get_mut<T: StoredObject>(&mut self) -> Result<&mut T, ObjectError> {
        let (rec, found) = (self.rec, self.object.kind());
        if self.mode < LockMode::ReadWrite {
            return Err(ObjectError::Storage(StorageError::NotWritable(self.view)));
        }
        T::from_object_mut(&mut self.object).ok_or(ObjectError::WrongKind {
            rec,
            expected: T::KIND,
            found,
        })
    }

    /// Record the image just read or written.
    pub fn refresh(&mut self, image: &[u8]) {
        self.length = image.len();
        self.checksum = crc32fast::hash(image);
    }
}
