//! Node storage backends for the B+Tree.
//!
//! The tree algorithms only see [`NodeStore`]. [`MemoryNodes`] keeps nodes in
//! a map for tests and scratch indices; [`CachedNodes`] serves them from the
//! cache table, so every node is a cached record locked through the store.

use std::collections::HashMap;

use crate::storage::btree::node::BTreeNode;
use crate::storage::btree::tree::BTreeError;
use crate::storage::cache::CacheTable;
use crate::storage::io::RecordStore;
use crate::storage::record::{LockMode, RecordId};

/// Callbacks the tree uses to reach its nodes.
pub trait NodeStore {
    /// Read access to a node.
    fn node(&mut self, id: RecordId) -> Result<&BTreeNode, BTreeError>;

    /// Write access to a node. The node is written back on the next flush.
    fn node_mut(&mut self, id: RecordId) -> Result<&mut BTreeNode, BTreeError>;

    /// Allocate an empty node.
    fn new_node(&mut self, leaf: bool) -> Result<RecordId, BTreeError>;

    /// Free a node that is no longer linked into the tree.
    fn delete_node(&mut self, id: RecordId) -> Result<(), BTreeError>;

    /// Pin a node so it stays resident, loading it first if needed.
    fn retain(&mut self, id: RecordId) -> Result<(), BTreeError>;

    /// Drop a pin taken with `retain`.
    fn release(&mut self, id: RecordId) -> Result<(), BTreeError>;
}

/// In-memory node storage.
#[derive(Debug, Default)]
pub struct MemoryNodes {
    nodes: HashMap<RecordId, BTreeNode>,
    pins: HashMap<RecordId, u32>,
    next_id: u64,
}

impl MemoryNodes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outstanding pins across all nodes.
    #[must_use]
    pub fn pinned(&self) -> u32 {
        self.pins.values().sum()
    }
}

impl NodeStore for MemoryNodes {
    fn node(&mut self, id: RecordId) -> Result<&BTreeNode, BTreeError> {
        self.nodes.get(&id).ok_or(BTreeError::MissingNode(id))
    }

    fn node_mut(&mut self, id: RecordId) -> Result<&mut BTreeNode, BTreeError> {
        self.nodes.get_mut(&id).ok_or(BTreeError::MissingNode(id))
    }

    fn new_node(&mut self, leaf: bool) -> Result<RecordId, BTreeError> {
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.nodes.insert(id, BTreeNode::new(leaf));
        Ok(id)
    }

    fn delete_node(&mut self, id: RecordId) -> Result<(), BTreeError> {
        self.pins.remove(&id);
        self.nodes
            .remove(&id)
            .map(|_| ())
            .ok_or(BTreeError::MissingNode(id))
    }

    fn retain(&mut self, id: RecordId) -> Result<(), BTreeError> {
        if !self.nodes.contains_key(&id) {
            return Err(BTreeError::MissingNode(id));
        }
        *self.pins.entry(id).or_default() += 1;
        Ok(())
    }

    fn release(&mut self, id: RecordId) -> Result<(), BTreeError> {
        match self.pins.get_mut(&id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.pins.remove(&id);
            }
            None => {
                return Err(BTreeError::Invariant(format!(
                    "release of unpinned node {id}"
                )));
            }
        }
        Ok(())
    }
}

/// Node storage backed by the cache table and a record store.
pub struct CachedNodes<'a, S: RecordStore> {
    cache: &'a mut CacheTable,
    store: &'a mut S,
}

impl<'a, S: RecordStore> CachedNodes<'a, S> {
    pub const fn new(cache: &'a mut CacheTable, store: &'a mut S) -> Self {
        Self { cache, store }
    }
}

impl<S: RecordStore> NodeStore for CachedNodes<'_, S> {
    fn node(&mut self, id: RecordId) -> Result<&BTreeNode, BTreeError> {
        Ok(self.cache.get::<BTreeNode, S>(self.store, id, LockMode::Read)?)
    }

    fn node_mut(&mut self, id: RecordId) -> Result<&mut BTreeNode, BTreeError> {
        Ok(self.cache.get_mut::<BTreeNode, S>(self.store, id)?)
    }

    fn new_node(&mut self, leaf: bool) -> Result<RecordId, BTreeError> {
        Ok(self.cache.insert_new(self.store, BTreeNode::new(leaf))?)
    }

    fn delete_node(&mut self, id: RecordId) -> Result<(), BTreeError> {
        Ok(self.cache.destroy(self.store, id)?)
    }

    fn retain(&mut self, id: RecordId) -> Result<(), BTreeError> {
        // The node may have been evicted, or never read since open.
        self.cache.get::<BTreeNode, S>(self.store, id, LockMode::Read)?;
        Ok(self.cache.retain(id)?)
    }

    fn release(&mut self, id: RecordId) -> Result<(), BTreeError> {
        Ok(self.cache.release(id)?)
    }
}
