//! Object-store interface.
//!
//! Algorithmic code never talks to a record store directly: it creates,
//! locks, reads and writes typed objects through [`ObjectInterface`]. The
//! trait is implemented for every [`RecordStore`], so swapping the backing
//! store (file, memory, fault-injecting) needs no change above this layer.

use crate::objects::{CachedObject, CodecContext, ObjectKind, StoredObject};
use crate::storage::cache::CachedItem;
use crate::storage::codec::{DecodeError, EncodeError};
use crate::storage::io::{RecordStore, StorageError};
use crate::storage::record::{LockMode, RecordId, RecordInfo, View};

/// Errors raised while moving objects in and out of a record store.
#[derive(Debug)]
pub enum ObjectError {
    /// The record store failed.
    Storage(StorageError),
    /// The stored image did not decode.
    Decode { rec: RecordId, source: DecodeError },
    /// The object could not be encoded.
    Encode { rec: RecordId, source: EncodeError },
    /// The record holds a different kind of object.
    WrongKind {
        rec: RecordId,
        expected: ObjectKind,
        found: ObjectKind,
    },
}

impl std::fmt::Display for ObjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Decode { rec, source } => write!(f, "record {rec} is corrupt: {source}"),
            Self::Encode { rec, source } => write!(f, "cannot encode record {rec}: {source}"),
            Self::WrongKind {
                rec,
                expected,
                found,
            } => write!(f, "record {rec} is a {found}, expected a {expected}"),
        }
    }
}

impl std::error::Error for ObjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Decode { source, .. } => Some(source),
            Self::Encode { source, .. } => Some(source),
            Self::WrongKind { .. } => None,
        }
    }
}

impl From<StorageError> for ObjectError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl ObjectError {
    /// Whether the failure was a lock conflict the caller may retry.
    #[must_use]
    pub const fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_lock_conflict())
    }
}

/// Typed record operations over a record store.
pub trait ObjectInterface {
    /// Allocate a record and store `template` as its first image.
    fn create_object<T: StoredObject>(
        &mut self,
        template: &T,
        ctx: &CodecContext,
    ) -> Result<RecordId, ObjectError>;

    /// Destroy a record held `ReadWrite` through `view`.
    fn destroy_object(&mut self, rec: RecordId, view: View) -> Result<(), ObjectError>;

    fn lock_object(&mut self, rec: RecordId, mode: LockMode) -> Result<View, ObjectError>;

    fn unlock_object(&mut self, view: View) -> Result<(), ObjectError>;

    fn upgrade_object(&mut self, view: View, mode: LockMode) -> Result<(), ObjectError>;

    fn abandon_object(&mut self, view: View) -> Result<(), ObjectError>;

    /// Lock a record and decode it as `kind`.
    ///
    /// On failure no view is left open.
    fn read_object(
        &mut self,
        rec: RecordId,
        kind: ObjectKind,
        mode: LockMode,
        ctx: &CodecContext,
    ) -> Result<CachedItem, ObjectError>;

    /// Encode an item and make the image the record's committed contents.
    ///
    /// Refreshes the item's length and checksum.
    fn write_object(&mut self, item: &mut CachedItem, ctx: &CodecContext)
    -> Result<(), ObjectError>;

    fn object_info(&self, view: View) -> Result<RecordInfo, ObjectError>;
}

impl<S: RecordStore> ObjectInterface for S {
    fn create_object<T: StoredObject>(
        &mut self,
        template: &T,
        ctx: &CodecContext,
    ) -> Result<RecordId, ObjectError> {
        let rec = self.allocate_record_id()?;
        let bytes = template
            .to_bytes(ctx)
            .map_err(|source| ObjectError::Encode { rec, source })?;
        let view = self.lock(rec, LockMode::ReadWrite)?;
        if let Err(e) = self.write_raw(view, &bytes) {
            self.abandon(view)?;
            return Err(e.into());
        }
        self.unlock(view)?;
        Ok(rec)
    }

    fn destroy_object(&mut self, rec: RecordId, view: View) -> Result<(), ObjectError> {
        Ok(self.destroy(rec, view)?)
    }

    fn lock_object(&mut self, rec: RecordId, mode: LockMode) -> Result<View, ObjectError> {
        Ok(self.lock(rec, mode)?)
    }

    fn unlock_object(&mut self, view: View) -> Result<(), ObjectError> {
        Ok(self.unlock(view)?)
    }

    fn upgrade_object(&mut self, view: View, mode: LockMode) -> Result<(), ObjectError> {
        Ok(self.upgrade(view, mode)?)
    }

    fn abandon_object(&mut self, view: View) -> Result<(), ObjectError> {
        Ok(self.abandon(view)?)
    }

    fn read_object(
        &mut self,
        rec: RecordId,
        kind: ObjectKind,
        mode: LockMode,
        ctx: &CodecContext,
    ) -> Result<CachedItem, ObjectError> {
        let view = self.lock(rec, mode)?;
        let decoded = self.read_raw(view).map_err(ObjectError::from).and_then(|bytes| {
            CachedObject::decode(kind, &bytes, ctx)
                .map(|object| (object, bytes))
                .map_err(|source| ObjectError::Decode { rec, source })
        });
        match decoded {
            Ok((object, bytes)) => {
                let mut item = CachedItem::create(object, rec, view, mode, bytes.len());
                item.refresh(&bytes);
                Ok(item)
            }
            Err(e) => {
                self.abandon(view)?;
                Err(e)
            }
        }
    }

    fn write_object(
        &mut self,
        item: &mut CachedItem,
        ctx: &CodecContext,
    ) -> Result<(), ObjectError> {
        if item.mode() < LockMode::ReadWrite {
            return Err(StorageError::NotWritable(item.view()).into());
        }
        let mut bytes = Vec::with_capacity(item.length());
        item.object()
            .encode(ctx, &mut bytes)
            .map_err(|source| ObjectError::Encode {
                rec: item.rec(),
                source,
            })?;
        self.write_raw(item.view(), &bytes)?;
        self.flush(item.view())?;
        item.refresh(&bytes);
        Ok(())
    }

    fn object_info(&self, view: View) -> Result<RecordInfo, ObjectError> {
        Ok(self.info(view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Contig, Track};
    use crate::storage::memory::{FaultConfig, MemoryStore};

    #[test]
    fn test_create_then_read() {
        let ctx = CodecContext::default();
        let mut store = MemoryStore::new();
        let mut contig = Contig::new("ctg1");
        contig.nseqs = 4;
        let rec = store.create_object(&contig, &ctx).expect("create");
        assert_eq!(rec, RecordId::FIRST);
        assert_eq!(store.open_views(), 0);

        let item = store
            .read_object(rec, ObjectKind::Contig, LockMode::Read, &ctx)
            .expect("read");
        assert_eq!(item.get::<Contig>().expect("contig"), &contig);
        assert_eq!(item.length(), store.committed(rec).expect("image").len());
        store.unlock_object(item.view()).expect("unlock");
        assert_eq!(store.open_views(), 0);
    }

    #[test]
    fn test_write_requires_read_write() {
        let ctx = CodecContext::default();
        let mut store = MemoryStore::new();
        let rec = store.create_object(&Track::new(1, 8), &ctx).expect("create");

        let mut item = store
            .read_object(rec, ObjectKind::Track, LockMode::Read, &ctx)
            .expect("read");
        assert!(matches!(
            store.write_object(&mut item, &ctx),
            Err(ObjectError::Storage(StorageError::NotWritable(_)))
        ));

        store
            .upgrade_object(item.view(), LockMode::ReadWrite)
            .expect("upgrade");
        item.mode = LockMode::ReadWrite;
        item.get_mut::<Track>().expect("track").items = vec![1, 2, 3];
        store.write_object(&mut item, &ctx).expect("write");

        let image = store.committed(rec).expect("image");
        assert_eq!(item.checksum(), crc32fast::hash(image));
        let decoded = Track::decode(image, &ctx).expect("decode");
        assert_eq!(decoded.items, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_failure_leaves_no_view() {
        let ctx = CodecContext::default();
        let mut store = MemoryStore::new();
        let rec = store.create_object(&Track::new(1, 8), &ctx).expect("create");
        let err = store
            .read_object(rec, ObjectKind::Contig, LockMode::Read, &ctx)
            .expect_err("track image is not a contig");
        assert!(matches!(err, ObjectError::Decode { .. }));
        assert_eq!(store.open_views(), 0);
    }

    #[test]
    fn test_conflicting_lock_reported() {
        let ctx = CodecContext::default();
        let mut store = MemoryStore::new();
        let rec = store.create_object(&Contig::new("a"), &ctx).expect("create");
        let view = store.lock_object(rec, LockMode::ReadWrite).expect("lock");
        let err = store
            .read_object(rec, ObjectKind::Contig, LockMode::Read, &ctx)
            .expect_err("conflict");
        assert!(err.is_lock_conflict());
        store.abandon_object(view).expect("abandon");
    }

    #[test]
    fn test_injected_read_fault_closes_view() {
        let ctx = CodecContext::default();
        let mut store = MemoryStore::with_faults(7, FaultConfig::default());
        let rec = store.create_object(&Contig::new("a"), &ctx).expect("create");
        store.set_fault_config(FaultConfig {
            read_error_rate: 1.0,
            ..FaultConfig::default()
        });
        let err = store
            .read_object(rec, ObjectKind::Contig, LockMode::Read, &ctx)
            .expect_err("fault");
        assert!(matches!(
            err,
            ObjectError::Storage(StorageError::InjectedFault(_))
        ));
        assert_eq!(store.open_views(), 0);
    }
}
