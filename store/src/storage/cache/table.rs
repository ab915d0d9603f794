//! Cache table: a generational slot arena of cached items keyed by record id.
//!
//! # Invariants
//!
//! - Each cached record occupies exactly one live slot, found via `index`
//! - A dirty item holds one reference, so only clean items are evicted
//! - A slot's generation changes whenever its item leaves, so a stale
//!   [`SlotKey`] never resolves to a newer item
//! - Every cached item owns one open view on the record store

use std::collections::HashMap;

use tracing::{debug, info};

use crate::objects::interface::{ObjectError, ObjectInterface};
use crate::objects::{CodecContext, ObjectKind, StoredObject};
use crate::storage::cache::item::CachedItem;
use crate::storage::io::RecordStore;
use crate::storage::record::{LockMode, RecordId};

/// Default number of items kept resident.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Generational key of a slot in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    refs: u32,
    last_used: u64,
    item: Option<CachedItem>,
}

/// Cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

/// Resident decoded records for one connection.
pub struct CacheTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<RecordId, SlotKey>,
    capacity: usize,
    ctx: CodecContext,
    clock: u64,
    stats: CacheStats,
}

impl CacheTable {
    #[must_use]
    pub fn new(capacity: usize, ctx: CodecContext) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            capacity: capacity.max(1),
            ctx,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Number of resident items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub const fn context(&self) -> CodecContext {
        self.ctx
    }

    /// Change the encoding used for future flushes and loads.
    pub fn set_context(&mut self, ctx: CodecContext) {
        self.ctx = ctx;
    }

    #[must_use]
    pub fn contains(&self, rec: RecordId) -> bool {
        self.index.contains_key(&rec)
    }

    /// The resident item for `rec`, if any.
    #[must_use]
    pub fn item(&self, rec: RecordId) -> Option<&CachedItem> {
        self.slot(rec).and_then(|slot| slot.item.as_ref())
    }

    /// Outstanding references on `rec`, including the one held while dirty.
    #[must_use]
    pub fn refs(&self, rec: RecordId) -> Option<u32> {
        self.slot(rec).map(|slot| slot.refs)
    }

    /// Records with unflushed changes, in record order.
    #[must_use]
    pub fn dirty_records(&self) -> Vec<RecordId> {
        let mut dirty: Vec<RecordId> = self
            .slots
            .iter()
            .filter_map(|slot| slot.item.as_ref())
            .filter(|item| item.dirty)
            .map(|item| item.rec)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    // ========== Loading ==========

    /// Make `rec` resident as `kind`, holding at least `mode`.
    ///
    /// A hit with a weaker lock upgrades the item's view in place.
    pub fn load<S: RecordStore>(
        &mut self,
        store: &mut S,
        rec: RecordId,
        kind: ObjectKind,
        mode: LockMode,
    ) -> Result<SlotKey, CacheError> {
        self.clock += 1;
        let clock = self.clock;

        if let Some(key) = self.index.get(&rec).copied() {
            let slot = self.slot_at_mut(key)?;
            slot.last_used = clock;
            let item = slot.item.as_mut().ok_or(CacheError::NotCached(rec))?;
            if item.kind() != kind {
                return Err(CacheError::WrongKind {
                    rec,
                    expected: kind,
                    found: item.kind(),
                });
            }
            if item.mode < mode {
                store.upgrade_object(item.view, mode)?;
                item.mode = mode;
            }
            self.stats.hits += 1;
            return Ok(key);
        }

        let item = store.read_object(rec, kind, mode, &self.ctx)?;
        self.stats.misses += 1;
        let key = self.insert_item(item, clock);
        self.evict(store, key)?;
        Ok(key)
    }

    /// Typed read access, loading on a miss.
    pub fn get<T: StoredObject, S: RecordStore>(
        &mut self,
        store: &mut S,
        rec: RecordId,
        mode: LockMode,
    ) -> Result<&T, CacheError> {
        let key = self.load(store, rec, T::KIND, mode)?;
        let item = self.slot_at(key)?.item.as_ref().ok_or(CacheError::NotCached(rec))?;
        Ok(item.get::<T>()?)
    }

    /// Typed write access. The item is locked `ReadWrite` and marked dirty
    /// before the reference is handed out.
    pub fn get_mut<T: StoredObject, S: RecordStore>(
        &mut self,
        store: &mut S,
        rec: RecordId,
    ) -> Result<&mut T, CacheError> {
        let key = self.load(store, rec, T::KIND, LockMode::ReadWrite)?;
        self.mark_dirty(rec)?;
        let item = self
            .slot_at_mut(key)?
            .item
            .as_mut()
            .ok_or(CacheError::NotCached(rec))?;
        Ok(item.get_mut::<T>()?)
    }

    /// Allocate a record for `object` and cache it locked `ReadWrite` and
    /// dirty. The record stays empty in the store until the item is flushed.
    pub fn insert_new<T: StoredObject, S: RecordStore>(
        &mut self,
        store: &mut S,
        object: T,
    ) -> Result<RecordId, CacheError> {
        let rec = store.allocate_record_id().map_err(ObjectError::from)?;
        let view = store.lock_object(rec, LockMode::ReadWrite)?;
        let item = CachedItem::create(object.into_object(), rec, view, LockMode::ReadWrite, 0);

        self.clock += 1;
        let key = self.insert_item(item, self.clock);
        self.mark_dirty(rec)?;
        self.evict(store, key)?;
        Ok(rec)
    }

    // ========== Dirty tracking ==========

    /// Flag an item as changed. Requires a `ReadWrite` lock; the first call
    /// takes a reference that keeps the item resident until it is flushed.
    pub fn mark_dirty(&mut self, rec: RecordId) -> Result<(), CacheError> {
        let slot = self.slot_mut(rec)?;
        let item = slot.item.as_mut().ok_or(CacheError::NotCached(rec))?;
        if item.mode < LockMode::ReadWrite {
            return Err(CacheError::NotWritable(rec));
        }
        if !item.dirty {
            item.dirty = true;
            slot.refs += 1;
        }
        Ok(())
    }

    /// Write a dirty item back to the store. Clean items are left alone.
    pub fn flush<S: RecordStore>(&mut self, store: &mut S, rec: RecordId) -> Result<(), CacheError> {
        let ctx = self.ctx;
        let slot = self.slot_mut(rec)?;
        let item = slot.item.as_mut().ok_or(CacheError::NotCached(rec))?;
        if !item.dirty {
            return Ok(());
        }
        store.write_object(item, &ctx)?;
        item.dirty = false;
        slot.refs = slot.refs.saturating_sub(1);
        self.stats.flushes += 1;
        Ok(())
    }

    /// Flush every dirty item in record order, then sync the store.
    pub fn commit<S: RecordStore>(&mut self, store: &mut S) -> Result<usize, CacheError> {
        let dirty = self.dirty_records();
        for &rec in &dirty {
            self.flush(store, rec)?;
        }
        store.sync().map_err(ObjectError::from)?;
        info!(flushed = dirty.len(), resident = self.len(), "committed cache");
        Ok(dirty.len())
    }

    // ========== References ==========

    /// Pin an item so it cannot be evicted.
    pub fn retain(&mut self, rec: RecordId) -> Result<(), CacheError> {
        self.slot_mut(rec)?.refs += 1;
        Ok(())
    }

    /// Drop a pin taken with `retain`.
    pub fn release(&mut self, rec: RecordId) -> Result<(), CacheError> {
        let slot = self.slot_mut(rec)?;
        if slot.refs == 0 {
            return Err(CacheError::NotRetained(rec));
        }
        slot.refs -= 1;
        Ok(())
    }

    // ========== Removal ==========

    /// Discard an item and any unflushed changes to it.
    pub fn abandon<S: RecordStore>(&mut self, store: &mut S, rec: RecordId) -> Result<(), CacheError> {
        let item = self.remove(rec)?;
        store.abandon_object(item.view)?;
        Ok(())
    }

    /// Flush an item and drop it from the table, closing its view.
    pub fn forget<S: RecordStore>(&mut self, store: &mut S, rec: RecordId) -> Result<(), CacheError> {
        self.flush(store, rec)?;
        if self.refs(rec).unwrap_or(0) > 0 {
            return Err(CacheError::Pinned(rec));
        }
        let item = self.remove(rec)?;
        store.unlock_object(item.view)?;
        Ok(())
    }

    /// Flush and drop every item.
    pub fn forget_all<S: RecordStore>(&mut self, store: &mut S) -> Result<(), CacheError> {
        let mut recs: Vec<RecordId> = self.index.keys().copied().collect();
        recs.sort_unstable();
        for rec in recs {
            self.flush(store, rec)?;
            let item = self.remove(rec)?;
            store.unlock_object(item.view)?;
        }
        Ok(())
    }

    /// Destroy a record, dropping any cached copy.
    pub fn destroy<S: RecordStore>(&mut self, store: &mut S, rec: RecordId) -> Result<(), CacheError> {
        if let Some(slot) = self.slot(rec) {
            let dirty_ref = slot.item.as_ref().is_some_and(|item| item.dirty);
            if slot.refs > u32::from(dirty_ref) {
                return Err(CacheError::Pinned(rec));
            }
            let mut item = self.remove(rec)?;
            if item.mode < LockMode::ReadWrite {
                store.upgrade_object(item.view, LockMode::ReadWrite)?;
                item.mode = LockMode::ReadWrite;
            }
            store.destroy_object(rec, item.view)?;
        } else {
            let view = store.lock_object(rec, LockMode::ReadWrite)?;
            store.destroy_object(rec, view)?;
        }
        Ok(())
    }

    // ========== Slots ==========

    fn insert_item(&mut self, mut item: CachedItem, clock: u64) -> SlotKey {
        let rec = item.rec;
        let index = self.free.pop().unwrap_or_else(|| {
            self.slots.push(Slot::default());
            u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX)
        });
        let slot = &mut self.slots[index as usize];
        let key = SlotKey {
            index,
            generation: slot.generation,
        };
        item.slot = Some(key);
        slot.refs = 0;
        slot.last_used = clock;
        slot.item = Some(item);
        self.index.insert(rec, key);
        key
    }

    fn remove(&mut self, rec: RecordId) -> Result<CachedItem, CacheError> {
        let key = self.index.remove(&rec).ok_or(CacheError::NotCached(rec))?;
        let slot = self.slot_at_mut(key)?;
        let item = slot.item.take().ok_or(CacheError::NotCached(rec))?;
        slot.generation = slot.generation.wrapping_add(1);
        slot.refs = 0;
        self.free.push(key.index);
        Ok(item)
    }

    /// Drop least recently used clean, unreferenced items until the table
    /// fits its capacity. Items that cannot be evicted may keep it above.
    fn evict<S: RecordStore>(&mut self, store: &mut S, keep: SlotKey) -> Result<(), CacheError> {
        while self.len() > self.capacity {
            let victim = self
                .slots
                .iter()
                .enumerate()
                .filter(|(i, slot)| {
                    slot.refs == 0
                        && *i != keep.index as usize
                        && slot.item.as_ref().is_some_and(|item| !item.dirty)
                })
                .min_by_key(|(_, slot)| slot.last_used)
                .and_then(|(_, slot)| slot.item.as_ref().map(|item| item.rec));
            let Some(rec) = victim else {
                return Ok(());
            };
            let item = self.remove(rec)?;
            store.unlock_object(item.view)?;
            self.stats.evictions += 1;
            debug!(%rec, kind = %item.kind(), "evicted cached item");
        }
        Ok(())
    }

    fn slot(&self, rec: RecordId) -> Option<&Slot> {
        let key = self.index.get(&rec)?;
        self.slot_at(*key).ok()
    }

    fn slot_mut(&mut self, rec: RecordId) -> Result<&mut Slot, CacheError> {
        let key = *self.index.get(&rec).ok_or(CacheError::NotCached(rec))?;
        self.slot_at_mut(key)
    }

    fn slot_at(&self, key: SlotKey) -> Result<&Slot, CacheError> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .ok_or(CacheError::StaleSlot(key))
    }

    fn slot_at_mut(&mut self, key: SlotKey) -> Result<&mut Slot, CacheError> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .ok_or(CacheError::StaleSlot(key))
    }
}

/// Errors raised by the cache table.
#[derive(Debug)]
pub enum CacheError {
    /// Reading or writing the record failed.
    Object(ObjectError),
    /// The item is not held `ReadWrite`.
    NotWritable(RecordId),
    /// The record is cached as a different kind.
    WrongKind {
        rec: RecordId,
        expected: ObjectKind,
        found: ObjectKind,
    },
    /// The record is not resident.
    NotCached(RecordId),
    /// A release without a matching retain.
    NotRetained(RecordId),
    /// The item is still referenced.
    Pinned(RecordId),
    /// A slot key outlived its item.
    StaleSlot(SlotKey),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Object(e) => write!(f, "{e}"),
            Self::NotWritable(rec) => write!(f, "record {rec} is not locked for writing"),
            Self::WrongKind {
                rec,
                expected,
                found,
            } => write!(f, "record {rec} is cached as a {found}, expected a {expected}"),
            Self::NotCached(rec) => write!(f, "record {rec} is not cached"),
            Self::NotRetained(rec) => write!(f, "record {rec} released more often than retained"),
            Self::Pinned(rec) => write!(f, "record {rec} is still referenced"),
            Self::StaleSlot(key) => write!(
                f,
                "slot {} generation {} no longer exists",
                key.index, key.generation
            ),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Object(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ObjectError> for CacheError {
    fn from(e: ObjectError) -> Self {
        match e {
            ObjectError::WrongKind {
                rec,
                expected,
                found,
            } => Self::WrongKind {
                rec,
                expected,
                found,
            },
            other => Self::Object(other),
        }
    }
}
