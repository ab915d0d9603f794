//! In-memory record store for deterministic testing.
//!
//! This module provides an in-memory implementation of the `RecordStore`
//! trait with support for fault injection:
//! - Read errors
//! - Write (flush) errors
//! - Sync failures

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{RecordStore, StorageError};
use crate::storage::lock::ViewTable;
use crate::storage::record::{LockMode, RecordId, RecordInfo, View};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a flush error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.05,
            write_error_rate: 0.05,
            sync_error_rate: 0.05,
        }
    }
}

/// Statistics about in-memory store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    pub reads: u64,
    pub flushes: u64,
    pub syncs: u64,
    pub injected_faults: u64,
}

/// In-memory record store.
///
/// Records live in a map from id to committed image. Not thread-safe; a
/// single connection drives it.
pub struct MemoryStore {
    records: HashMap<RecordId, Vec<u8>>,
    next_record: RecordId,
    views: ViewTable,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create an empty store without faults.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::default())
    }

    /// Create an empty store whose faults are drawn from `seed`.
    ///
    /// The same seed produces the same sequence of faults.
    #[must_use]
    pub fn with_faults(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            records: HashMap::new(),
            next_record: RecordId::FIRST,
            views: ViewTable::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Number of live records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of views currently open.
    #[must_use]
    pub fn open_views(&self) -> usize {
        self.views.open_views()
    }

    /// Committed image of a record, bypassing locks. Test inspection only.
    #[must_use]
    pub fn committed(&self, rec: RecordId) -> Option<&[u8]> {
        self.records.get(&rec).map(Vec::as_slice)
    }

    fn inject(&mut self, rate: f64, what: &str) -> Result<(), StorageError> {
        if rate > 0.0 && self.rng.random::<f64>() < rate {
            self.stats.injected_faults += 1;
            return Err(StorageError::InjectedFault(format!("simulated {what} error")));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn allocate_record_id(&mut self) -> Result<RecordId, StorageError> {
        let rec = self.next_record;
        self.next_record = rec.next();
        self.records.insert(rec, Vec::new());
        Ok(rec)
    }

    fn destroy(&mut self, rec: RecordId, view: View) -> Result<(), StorageError> {
        if self.views.writable(view)?.rec != rec {
            return Err(StorageError::NotWritable(view));
        }
        self.views.close(view)?;
        self.records
            .remove(&rec)
            .map(|_| ())
            .ok_or(StorageError::RecordNotFound(rec))
    }

    fn lock(&mut self, rec: RecordId, mode: LockMode) -> Result<View, StorageError> {
        if !self.records.contains_key(&rec) {
            return Err(StorageError::RecordNotFound(rec));
        }
        self.views.open(rec, mode)
    }

    fn unlock(&mut self, view: View) -> Result<(), StorageError> {
        self.flush(view)?;
        self.views.close(view).map(|_| ())
    }

    fn upgrade(&mut self, view: View, mode: LockMode) -> Result<(), StorageError> {
        self.views.upgrade(view, mode)
    }

    fn abandon(&mut self, view: View) -> Result<(), StorageError> {
        self.views.close(view).map(|_| ())
    }

    fn read_raw(&mut self, view: View) -> Result<Vec<u8>, StorageError> {
        self.stats.reads += 1;
        self.inject(self.fault_config.read_error_rate, "read")?;
        let state = self.views.get(view)?;
        if let Some(staged) = &state.staged {
            return Ok(staged.clone());
        }
        self.records
            .get(&state.rec)
            .cloned()
            .ok_or(StorageError::RecordNotFound(state.rec))
    }

    fn write_raw(&mut self, view: View, bytes: &[u8]) -> Result<(), StorageError> {
        self.views.writable(view)?.staged = Some(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self, view: View) -> Result<(), StorageError> {
        if self.views.get(view)?.staged.is_none() {
            return Ok(());
        }
        self.inject(self.fault_config.write_error_rate, "write")?;
        let state = self.views.get_mut(view)?;
        if let Some(bytes) = state.staged.take() {
            self.stats.flushes += 1;
            self.records.insert(state.rec, bytes);
        }
        Ok(())
    }

    fn info(&self, view: View) -> Result<RecordInfo, StorageError> {
        let state = self.views.get(view)?;
        let length = match &state.staged {
            Some(bytes) => bytes.len(),
            None => self
                .records
                .get(&state.rec)
                .map(Vec::len)
                .ok_or(StorageError::RecordNotFound(state.rec))?,
        };
        Ok(RecordInfo {
            rec: state.rec,
            mode: state.mode,
            length,
        })
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;
        self.inject(self.fault_config.sync_error_rate, "sync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_sequential() {
        let mut store = MemoryStore::new();
        let a = store.allocate_record_id().expect("a");
        let b = store.allocate_record_id().expect("b");
        assert_eq!(a, RecordId::FIRST);
        assert_eq!(b, a.next());
        assert_eq!(store.record_count(), 2);
    }

    #[test]
    fn test_write_flush_read() {
        let mut store = MemoryStore::new();
        let rec = store.allocate_record_id().expect("allocate");
        let view = store.lock(rec, LockMode::ReadWrite).expect("lock");

        store.write_raw(view, b"hello").expect("write");
        // Staged bytes are visible through the view before flush.
        assert_eq!(store.read_raw(view).expect("read"), b"hello");
        assert_eq!(store.committed(rec), Some(&b""[..]));

        store.flush(view).expect("flush");
        assert_eq!(store.committed(rec), Some(&b"hello"[..]));
        assert_eq!(store.info(view).expect("info").length, 5);
        store.unlock(view).expect("unlock");
        assert_eq!(store.open_views(), 0);
    }

    #[test]
    fn test_abandon_discards_staged_bytes() {
        let mut store = MemoryStore::new();
        let rec = store.allocate_record_id().expect("allocate");
        let view = store.lock(rec, LockMode::ReadWrite).expect("lock");
        store.write_raw(view, b"v1").expect("write");
        store.flush(view).expect("flush");
        store.write_raw(view, b"v2").expect("write");
        store.abandon(view).expect("abandon");

        assert_eq!(store.committed(rec), Some(&b"v1"[..]));
    }

    #[test]
    fn test_unlock_flushes() {
        let mut store = MemoryStore::new();
        let rec = store.allocate_record_id().expect("allocate");
        let view = store.lock(rec, LockMode::ReadWrite).expect("lock");
        store.write_raw(view, b"data").expect("write");
        store.unlock(view).expect("unlock");
        assert_eq!(store.committed(rec), Some(&b"data"[..]));
    }

    #[test]
    fn test_write_requires_read_write() {
        let mut store = MemoryStore::new();
        let rec = store.allocate_record_id().expect("allocate");
        let view = store.lock(rec, LockMode::Read).expect("lock");
        assert!(matches!(
            store.write_raw(view, b"x"),
            Err(StorageError::NotWritable(_))
        ));
        store.upgrade(view, LockMode::ReadWrite).expect("upgrade");
        store.write_raw(view, b"x").expect("write after upgrade");
    }

    #[test]
    fn test_lock_missing_record() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.lock(RecordId(9), LockMode::Read),
            Err(StorageError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_destroy() {
        let mut store = MemoryStore::new();
        let rec = store.allocate_record_id().expect("allocate");
        let view = store.lock(rec, LockMode::ReadWrite).expect("lock");
        store.destroy(rec, view).expect("destroy");
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.open_views(), 0);
        assert!(store.lock(rec, LockMode::Read).is_err());
    }

    #[test]
    fn test_fault_injection_is_deterministic() {
        let run = |seed| {
            let mut store = MemoryStore::with_faults(seed, FaultConfig::high_faults());
            let rec = store.allocate_record_id().expect("allocate");
            let view = store.lock(rec, LockMode::Read).expect("lock");
            (0..200)
                .map(|_| store.read_raw(view).is_err())
                .collect::<Vec<_>>()
        };
        let first = run(7);
        assert_eq!(first, run(7));
        assert!(first.iter().any(|&failed| failed));
    }
}
