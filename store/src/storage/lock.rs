//! View and lock bookkeeping shared by record store implementations.
//!
//! # Invariants
//!
//! - A record is held `ReadWrite` by at most one view, and then by no reader
//! - `LockMode::None` views never appear in the lock counts
//! - Every open view has exactly one entry in `views`

use std::collections::HashMap;

use crate::storage::io::StorageError;
use crate::storage::record::{LockMode, RecordId, View};

/// State of one open view.
#[derive(Debug)]
pub struct ViewState {
    pub rec: RecordId,
    pub mode: LockMode,
    /// Bytes written through the view but not yet flushed.
    pub staged: Option<Vec<u8>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LockCounts {
    readers: u32,
    writer: bool,
}

/// Open views plus per-record lock counts.
#[derive(Debug, Default)]
pub struct ViewTable {
    views: HashMap<View, ViewState>,
    locks: HashMap<RecordId, LockCounts>,
    next_view: u64,
}

impl ViewTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a view, acquiring the requested lock.
    pub fn open(&mut self, rec: RecordId, mode: LockMode) -> Result<View, StorageError> {
        self.acquire(rec, mode)?;
        self.next_view += 1;
        let view = View(self.next_view);
        self.views.insert(
            view,
            ViewState {
                rec,
                mode,
                staged: None,
            },
        );
        Ok(view)
    }

    /// Close a view, releasing its lock and returning its state.
    pub fn close(&mut self, view: View) -> Result<ViewState, StorageError> {
        let state = self
            .views
            .remove(&view)
            .ok_or(StorageError::UnknownView(view))?;
        self.release(state.rec, state.mode);
        Ok(state)
    }

    /// Raise the lock held by `view` to `mode`. Weaker or equal modes are a no-op.
    pub fn upgrade(&mut self, view: View, mode: LockMode) -> Result<(), StorageError> {
        let (rec, current) = {
            let state = self.get(view)?;
            (state.rec, state.mode)
        };
        if mode <= current {
            return Ok(());
        }

        let counts = self.locks.get(&rec).copied().unwrap_or_default();
        // Readers other than this view block an upgrade to exclusive.
        let own_reader = u32::from(current == LockMode::Read);
        let conflict = counts.writer
            || (mode == LockMode::ReadWrite && counts.readers > own_reader);
        if conflict {
            return Err(StorageError::LockConflict {
                rec,
                requested: mode,
            });
        }

        self.release(rec, current);
        self.acquire(rec, mode)?;
        if let Some(state) = self.views.get_mut(&view) {
            state.mode = mode;
        }
        Ok(())
    }

    pub fn get(&self, view: View) -> Result<&ViewState, StorageError> {
        self.views.get(&view).ok_or(StorageError::UnknownView(view))
    }

    pub fn get_mut(&mut self, view: View) -> Result<&mut ViewState, StorageError> {
        self.views
            .get_mut(&view)
            .ok_or(StorageError::UnknownView(view))
    }

    /// Fetch a view that must be writable.
    pub fn writable(&mut self, view: View) -> Result<&mut ViewState, StorageError> {
        let state = self.get_mut(view)?;
        if state.mode < LockMode::ReadWrite {
            return Err(StorageError::NotWritable(view));
        }
        Ok(state)
    }

    /// Number of open views.
    #[must_use]
    pub fn open_views(&self) -> usize {
        self.views.len()
    }

    fn acquire(&mut self, rec: RecordId, mode: LockMode) -> Result<(), StorageError> {
        let counts = self.locks.entry(rec).or_default();
        match mode {
            LockMode::None => {}
            LockMode::Read => {
                if counts.writer {
                    return Err(StorageError::LockConflict {
                        rec,
                        requested: mode,
                    });
                }
                counts.readers += 1;
            }
            LockMode::ReadWrite => {
                if counts.writer || counts.readers > 0 {
                    return Err(StorageError::LockConflict {
                        rec,
                        requested: mode,
                    });
                }
                counts.writer = true;
            }
        }
        if counts.readers == 0 && !counts.writer {
            self.locks.remove(&rec);
        }
        Ok(())
    }

    fn release(&mut self, rec: RecordId, mode: LockMode) {
        if let Some(counts) = self.locks.get_mut(&rec) {
            match mode {
                LockMode::None => {}
                LockMode::Read => counts.readers = counts.readers.saturating_sub(1),
                LockMode::ReadWrite => counts.writer = false,
            }
            if counts.readers == 0 && !counts.writer {
                self.locks.remove(&rec);
            }
        }
    }
}
