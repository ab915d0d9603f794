//! B+Tree algorithms over string keys.
//!
//! The tree is a multimap from names to record ids. Leaves hold the entries,
//! internal nodes hold one separator per child equal to the largest key in
//! that child, and every level is chained left to right through `next`.
//!
//! # Invariants
//!
//! - Keys are non-decreasing within a node and along the leaf chain
//! - `keys[i]` of an internal node equals the maximum key under `chld[i]`
//! - Every non-root node holds between `order.min` and `order.max` entries
//! - An internal root has at least two children
//! - `parent` of every node names the internal node that lists it
//!
//! # Failure
//!
//! A node-store error in the middle of a split or merge is returned as is;
//! nothing is rolled back. Run `check` before trusting the tree again.

use tracing::debug;

use crate::storage::btree::node::{BTreeNode, MAX_KEY_LEN};
use crate::storage::btree::store::NodeStore;
use crate::storage::cache::CacheError;
use crate::storage::record::RecordId;

/// Default maximum entries per node.
pub const BTREE_MAX: usize = 4000;

/// Default minimum entries per non-root node.
pub const BTREE_MIN: usize = BTREE_MAX / 2;

/// Node occupancy bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOrder {
    pub max: usize,
    pub min: usize,
}

impl TreeOrder {
    /// Smallest accepted `max`.
    pub const MIN_MAX: usize = 4;

    /// Largest accepted `max`; a node image counts its entries in two bytes.
    pub const MAX_MAX: usize = u16::MAX as usize;

    /// Bounds with `min = max / 2`.
    pub const fn new(max: usize) -> Result<Self, BTreeError> {
        if max < Self::MIN_MAX || max > Self::MAX_MAX {
            return Err(BTreeError::InvalidOrder(max));
        }
        Ok(Self { max, min: max / 2 })
    }
}

impl Default for TreeOrder {
    fn default() -> Self {
        Self {
            max: BTREE_MAX,
            min: BTREE_MIN,
        }
    }
}

/// Shape summary returned by [`BTree::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Levels including the leaves.
    pub depth: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub entries: usize,
}

/// A B+Tree whose nodes live in a [`NodeStore`].
pub struct BTree<N: NodeStore> {
    nodes: N,
    root: RecordId,
    order: TreeOrder,
}

impl<N: NodeStore> BTree<N> {
    /// Create an empty tree with a fresh leaf root.
    pub fn create(mut nodes: N, order: TreeOrder) -> Result<Self, BTreeError> {
        let root = nodes.new_node(true)?;
        Ok(Self { nodes, root, order })
    }

    /// Open an existing tree rooted at `root`.
    pub const fn open(nodes: N, root: RecordId, order: TreeOrder) -> Self {
        Self { nodes, root, order }
    }

    /// Current root. Changes when the root splits or collapses.
    #[must_use]
    pub const fn root(&self) -> RecordId {
        self.root
    }

    #[must_use]
    pub const fn order(&self) -> TreeOrder {
        self.order
    }

    #[must_use]
    pub const fn nodes(&self) -> &N {
        &self.nodes
    }

    pub fn into_nodes(self) -> N {
        self.nodes
    }

    // ========== Lookup ==========

    /// Find the record for `key`.
    ///
    /// With `prefix` set, the first key starting with `key` matches;
    /// otherwise only an identical key does. With duplicates the leftmost
    /// entry wins.
    pub fn search(&mut self, key: &str, prefix: bool) -> Result<Option<RecordId>, BTreeError> {
        let Some((leaf, index)) = self.seek(key)? else {
            return Ok(None);
        };
        let node = self.nodes.node(leaf)?;
        let found = &node.keys[index];
        let matched = if prefix {
            found.starts_with(key)
        } else {
            found == key
        };
        Ok(matched.then_some(node.chld[index]))
    }

    /// Every record whose key starts with `prefix`, in key order.
    pub fn search_all(&mut self, prefix: &str) -> Result<Vec<RecordId>, BTreeError> {
        Ok(self
            .collect_from(prefix, |key| key.starts_with(prefix))?
            .into_iter()
            .map(|(_, rec)| rec)
            .collect())
    }

    /// Entries from the first key `>= start` (or the first key) onwards.
    pub fn iter(&mut self, start: Option<&str>) -> Result<BTreeIter<'_, N>, BTreeError> {
        let position = self.seek(start.unwrap_or(""))?;
        if let Some((leaf, _)) = position {
            self.nodes.retain(leaf)?;
        }
        Ok(BTreeIter {
            tree: self,
            leaf: position.map(|(leaf, _)| leaf),
            index: position.map_or(0, |(_, index)| index),
        })
    }

    /// Number of entries, counted along the leaf chain.
    pub fn count(&mut self) -> Result<usize, BTreeError> {
        let mut count = 0;
        let mut current = Some(self.first_leaf()?);
        while let Some(id) = current {
            let node = self.nodes.node(id)?;
            count += node.used();
            current = node.next;
        }
        Ok(count)
    }

    /// Leftmost leaf.
    pub fn first_leaf(&mut self) -> Result<RecordId, BTreeError> {
        let mut id = self.root;
        loop {
            let node = self.nodes.node(id)?;
            if node.leaf {
                return Ok(id);
            }
            id = *node
                .chld
                .first()
                .ok_or_else(|| BTreeError::Invariant(format!("internal node {id} is empty")))?;
        }
    }

    /// Descend to the leaf that holds, or would hold, `key`.
    ///
    /// With `after_equal` the descent passes over children whose maximum is
    /// equal to `key`, which lands on the last position among duplicates.
    fn find_leaf(&mut self, key: &str, after_equal: bool) -> Result<RecordId, BTreeError> {
        let mut id = self.root;
        loop {
            let node = self.nodes.node(id)?;
            if node.leaf {
                return Ok(id);
            }
            if node.is_empty() {
                return Err(BTreeError::Invariant(format!("internal node {id} is empty")));
            }
            let index = if after_equal {
                node.upper_bound(key)
            } else {
                node.lower_bound(key)
            };
            id = node.chld[index.min(node.used() - 1)];
        }
    }

    /// Position of the first entry `>= key`, following the leaf chain when
    /// the target leaf is exhausted.
    fn seek(&mut self, key: &str) -> Result<Option<(RecordId, usize)>, BTreeError> {
        let mut leaf = self.find_leaf(key, false)?;
        loop {
            let node = self.nodes.node(leaf)?;
            let index = node.lower_bound(key);
            if index < node.used() {
                return Ok(Some((leaf, index)));
            }
            match node.next {
                Some(next) => leaf = next,
                None => return Ok(None),
            }
        }
    }

    /// Entries from the first key `>= start` while `accept` holds.
    fn collect_from(
        &mut self,
        start: &str,
        accept: impl Fn(&str) -> bool,
    ) -> Result<Vec<(String, RecordId)>, BTreeError> {
        let mut out = Vec::new();
        let Some((mut leaf, mut index)) = self.seek(start)? else {
            return Ok(out);
        };
        loop {
            let node = self.nodes.node(leaf)?;
            for (key, &rec) in node.keys[index..].iter().zip(&node.chld[index..]) {
                if !accept(key) {
                    return Ok(out);
                }
                out.push((key.clone(), rec));
            }
            match node.next {
                Some(next) => {
                    leaf = next;
                    index = 0;
                }
                None => return Ok(out),
            }
        }
    }

    // ========== Insertion ==========

    /// Add an entry. Equal keys are kept; the new entry goes after them.
    pub fn insert(&mut self, key: &str, rec: RecordId) -> Result<(), BTreeError> {
        if key.len() > MAX_KEY_LEN {
            return Err(BTreeError::KeyTooLong(key.len()));
        }

        let leaf = self.find_leaf(key, true)?;
        let (used, new_max) = {
            let node = self.nodes.node_mut(leaf)?;
            let index = node.upper_bound(key);
            node.insert_at(index, key.to_string(), rec);
            (node.used(), index + 1 == node.used())
        };
        if new_max {
            self.fix_separators(leaf)?;
        }
        if used > self.order.max {
            self.split(leaf)?;
        }
        Ok(())
    }

    /// Split an overfull node in half and hook the right half into the parent.
    fn split(&mut self, id: RecordId) -> Result<(), BTreeError> {
        let (leaf, parent, next, keys, chld) = {
            let node = self.nodes.node_mut(id)?;
            let mid = node.used() / 2;
            let (keys, chld) = node.split_off(mid);
            (node.leaf, node.parent, node.next, keys, chld)
        };

        let right = self.nodes.new_node(leaf)?;
        if !leaf {
            for &child in &chld {
                self.nodes.node_mut(child)?.parent = Some(right);
            }
        }
        let right_max = {
            let node = self.nodes.node_mut(right)?;
            node.keys = keys;
            node.chld = chld;
            node.parent = parent;
            node.next = next;
            node.max_key().map(ToString::to_string)
        };
        let left_max = {
            let node = self.nodes.node_mut(id)?;
            node.next = Some(right);
            node.max_key().map(ToString::to_string)
        };
        let (Some(left_max), Some(right_max)) = (left_max, right_max) else {
            return Err(BTreeError::Invariant(format!("split of node {id} left a half empty")));
        };
        debug!(node = %id, right = %right, leaf, "split btree node");

        match parent {
            None => {
                let root = self.nodes.new_node(false)?;
                {
                    let node = self.nodes.node_mut(root)?;
                    node.keys = vec![left_max, right_max];
                    node.chld = vec![id, right];
                }
                self.nodes.node_mut(id)?.parent = Some(root);
                self.nodes.node_mut(right)?.parent = Some(root);
                debug!(old = %self.root, new = %root, "btree root split");
                self.root = root;
            }
            Some(parent) => {
                let used = {
                    let node = self.nodes.node_mut(parent)?;
                    let index = node.child_index(id).ok_or_else(|| not_a_child(parent, id))?;
                    node.keys[index] = left_max;
                    node.insert_at(index + 1, right_max, right);
                    node.used()
                };
                if used > self.order.max {
                    self.split(parent)?;
                }
            }
        }
        Ok(())
    }

    /// Propagate a changed maximum of `id` up through the separators.
    fn fix_separators(&mut self, mut id: RecordId) -> Result<(), BTreeError> {
        loop {
            let (max, parent) = {
                let node = self.nodes.node(id)?;
                match node.max_key() {
                    Some(max) => (max.to_string(), node.parent),
                    None => return Ok(()),
                }
            };
            let Some(parent) = parent else {
                return Ok(());
            };
            let node = self.nodes.node(parent)?;
            let index = node.child_index(id).ok_or_else(|| not_a_child(parent, id))?;
            if node.keys[index] == max {
                return Ok(());
            }
            let is_last = index + 1 == node.used();
            self.nodes.node_mut(parent)?.keys[index] = max;
            if !is_last {
                return Ok(());
            }
            id = parent;
        }
    }

    // ========== Deletion ==========

    /// Remove the first entry with exactly `key`. Returns whether one existed.
    pub fn delete(&mut self, key: &str) -> Result<bool, BTreeError> {
        let Some((leaf, index)) = self.seek(key)? else {
            return Ok(false);
        };
        if self.nodes.node(leaf)?.keys[index] != key {
            return Ok(false);
        }
        self.remove_entry(leaf, index)?;
        Ok(true)
    }

    /// Remove the entry pairing `key` with `rec`, scanning forward across
    /// duplicates. Returns whether one existed.
    pub fn delete_record(&mut self, key: &str, rec: RecordId) -> Result<bool, BTreeError> {
        let Some((mut leaf, mut index)) = self.seek(key)? else {
            return Ok(false);
        };
        loop {
            let node = self.nodes.node(leaf)?;
            while index < node.used() {
                if node.keys[index] != key {
                    return Ok(false);
                }
                if node.chld[index] == rec {
                    self.remove_entry(leaf, index)?;
                    return Ok(true);
                }
                index += 1;
            }
            match node.next {
                Some(next) => {
                    leaf = next;
                    index = 0;
                }
                None => return Ok(false),
            }
        }
    }

    fn remove_entry(&mut self, leaf: RecordId, index: usize) -> Result<(), BTreeError> {
        let was_last = {
            let node = self.nodes.node_mut(leaf)?;
            node.remove_at(index);
            index == node.used()
        };
        if was_last {
            self.fix_separators(leaf)?;
        }
        self.rebalance(leaf)
    }

    /// Restore occupancy of `id` after a removal, recursing upwards.
    fn rebalance(&mut self, mut id: RecordId) -> Result<(), BTreeError> {
        loop {
            let (parent, used) = {
                let node = self.nodes.node(id)?;
                (node.parent, node.used())
            };
            let Some(parent) = parent else {
                return self.collapse_root();
            };
            if used >= self.order.min {
                return Ok(());
            }

            let (left, right, left_index) = {
                let node = self.nodes.node(parent)?;
                let index = node.child_index(id).ok_or_else(|| not_a_child(parent, id))?;
                if index > 0 {
                    (node.chld[index - 1], id, index - 1)
                } else if index + 1 < node.used() {
                    (id, node.chld[index + 1], index)
                } else {
                    return Err(BTreeError::Invariant(format!(
                        "node {id} has no sibling under {parent}"
                    )));
                }
            };
            let sibling = if left == id { right } else { left };
            if self.nodes.node(sibling)?.used() > self.order.min {
                return self.redistribute(left, right);
            }

            self.merge(parent, left, right, left_index)?;
            id = parent;
        }
    }

    /// Even out two adjacent siblings.
    fn redistribute(&mut self, left: RecordId, right: RecordId) -> Result<(), BTreeError> {
        let left_used = self.nodes.node(left)?.used();
        let right_used = self.nodes.node(right)?.used();
        let target = (left_used + right_used) / 2;

        let moved = if left_used > target {
            let (mut keys, mut chld) = self.nodes.node_mut(left)?.split_off(target);
            let moved = chld.clone();
            let node = self.nodes.node_mut(right)?;
            keys.append(&mut node.keys);
            chld.append(&mut node.chld);
            node.keys = keys;
            node.chld = chld;
            (moved, right)
        } else {
            let take = target - left_used;
            let (keys, chld): (Vec<String>, Vec<RecordId>) = {
                let node = self.nodes.node_mut(right)?;
                (node.keys.drain(..take).collect(), node.chld.drain(..take).collect())
            };
            let node = self.nodes.node_mut(left)?;
            node.keys.extend(keys);
            node.chld.extend(chld.iter().copied());
            (chld, left)
        };
        self.adopt(&moved.0, moved.1)?;

        debug!(%left, %right, target, "redistributed btree nodes");
        self.fix_separators(left)?;
        self.fix_separators(right)
    }

    /// Fold `right` into `left` and unlink it from `parent`.
    fn merge(
        &mut self,
        parent: RecordId,
        left: RecordId,
        right: RecordId,
        left_index: usize,
    ) -> Result<(), BTreeError> {
        let (keys, chld, next) = {
            let node = self.nodes.node_mut(right)?;
            (
                std::mem::take(&mut node.keys),
                std::mem::take(&mut node.chld),
                node.next,
            )
        };
        self.adopt(&chld, left)?;
        {
            let node = self.nodes.node_mut(left)?;
            node.keys.extend(keys);
            node.chld.extend(chld);
            node.next = next;
        }
        self.nodes.node_mut(parent)?.remove_at(left_index + 1);
        self.nodes.delete_node(right)?;
        debug!(%left, %right, "merged btree nodes");

        // Dropping the parent's last child lowers the parent's maximum too.
        self.fix_separators(left)?;
        self.fix_separators(parent)
    }

    /// Point moved children of an internal node at their new parent.
    fn adopt(&mut self, children: &[RecordId], parent: RecordId) -> Result<(), BTreeError> {
        if self.nodes.node(parent)?.leaf {
            return Ok(());
        }
        for &child in children {
            self.nodes.node_mut(child)?.parent = Some(parent);
        }
        Ok(())
    }

    /// Replace an internal root that has a single child by that child.
    fn collapse_root(&mut self) -> Result<(), BTreeError> {
        loop {
            let node = self.nodes.node(self.root)?;
            if node.leaf || node.used() != 1 {
                return Ok(());
            }
            let child = node.chld[0];
            self.nodes.node_mut(child)?.parent = None;
            self.nodes.delete_node(self.root)?;
            debug!(old = %self.root, new = %child, "btree root collapsed");
            self.root = child;
        }
    }

    // ========== Whole-tree operations ==========

    /// Every node id, parents before children.
    pub fn node_ids(&mut self) -> Result<Vec<RecordId>, BTreeError> {
        let mut ids = vec![self.root];
        let mut next = 0;
        while let Some(&id) = ids.get(next) {
            let node = self.nodes.node(id)?;
            if !node.leaf {
                ids.extend(node.chld.iter().copied());
            }
            next += 1;
        }
        Ok(ids)
    }

    /// Delete every node of the tree.
    pub fn destroy(mut self) -> Result<N, BTreeError> {
        let mut pending = vec![self.root];
        while let Some(id) = pending.pop() {
            let node = self.nodes.node(id)?;
            if !node.leaf {
                pending.extend(node.chld.iter().copied());
            }
            self.nodes.delete_node(id)?;
        }
        Ok(self.nodes)
    }

    /// Verify every structural invariant and summarise the tree's shape.
    pub fn check(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats::default();
        let mut levels: Vec<Vec<RecordId>> = Vec::new();
        self.check_node(self.root, None, 0, &mut stats, &mut levels)?;
        stats.depth = levels.len();

        // Each level must be chained left to right, ending in `None`.
        for level in &levels {
            for (i, &id) in level.iter().enumerate() {
                let expected = level.get(i + 1).copied();
                let next = self.nodes.node(id)?.next;
                if next != expected {
                    return Err(BTreeError::Invariant(format!(
                        "node {id} links to {next:?}, expected {expected:?}"
                    )));
                }
            }
        }

        // Keys never decrease along the leaf chain.
        let mut prev: Option<String> = None;
        if let Some(leaves) = levels.last() {
            for &id in leaves {
                let node = self.nodes.node(id)?;
                if let (Some(prev), Some(first)) = (&prev, node.keys.first()) {
                    if first < prev {
                        return Err(BTreeError::Invariant(format!(
                            "leaf {id} starts with {first:?} below {prev:?}"
                        )));
                    }
                }
                if let Some(max) = node.max_key() {
                    prev = Some(max.to_string());
                }
            }
        }
        Ok(stats)
    }

    /// Returns the maximum key under `id`.
    fn check_node(
        &mut self,
        id: RecordId,
        parent: Option<RecordId>,
        depth: usize,
        stats: &mut TreeStats,
        levels: &mut Vec<Vec<RecordId>>,
    ) -> Result<Option<String>, BTreeError> {
        let order = self.order;
        let node: BTreeNode = self.nodes.node(id)?.clone();
        let invariant = |msg: String| Err(BTreeError::Invariant(format!("node {id}: {msg}")));

        if node.parent != parent {
            return invariant(format!("parent is {:?}, expected {parent:?}", node.parent));
        }
        if node.keys.len() != node.chld.len() {
            return invariant("key and child counts differ".to_string());
        }
        if node.keys.windows(2).any(|w| w[0] > w[1]) {
            return invariant("keys out of order".to_string());
        }
        if node.used() > order.max {
            return invariant(format!("{} entries above maximum {}", node.used(), order.max));
        }
        match parent {
            Some(_) if node.used() < order.min => {
                return invariant(format!("{} entries below minimum {}", node.used(), order.min));
            }
            None if !node.leaf && node.used() < 2 => {
                return invariant("internal root with fewer than two children".to_string());
            }
            _ => {}
        }

        if levels.len() <= depth {
            levels.push(Vec::new());
        }
        levels[depth].push(id);
        stats.nodes += 1;

        if node.leaf {
            if stats.leaves == 0 {
                stats.depth = depth + 1;
            } else if stats.depth != depth + 1 {
                return invariant("leaves at different depths".to_string());
            }
            stats.leaves += 1;
            stats.entries += node.used();
            return Ok(node.max_key().map(ToString::to_string));
        }

        for (key, &child) in node.keys.iter().zip(&node.chld) {
            let child_max = self.check_node(child, Some(id), depth + 1, stats, levels)?;
            if child_max.as_deref() != Some(key.as_str()) {
                return invariant(format!(
                    "separator {key:?} does not match child maximum {child_max:?}"
                ));
            }
        }
        Ok(node.max_key().map(ToString::to_string))
    }
}

fn not_a_child(parent: RecordId, child: RecordId) -> BTreeError {
    BTreeError::Invariant(format!("node {child} is not a child of {parent}"))
}

/// Forward iterator over `(key, record)` entries.
///
/// Holds a pin on the leaf it is positioned in. The tree stays mutably
/// borrowed while the iterator lives.
pub struct BTreeIter<'a, N: NodeStore> {
    tree: &'a mut BTree<N>,
    leaf: Option<RecordId>,
    index: usize,
}

impl<N: NodeStore> BTreeIter<'_, N> {
    /// Get the next entry.
    pub fn next_entry(&mut self) -> Result<Option<(String, RecordId)>, BTreeError> {
        loop {
            let Some(leaf) = self.leaf else {
                return Ok(None);
            };
            let node = self.tree.nodes.node(leaf)?;
            if self.index < node.used() {
                let entry = (node.keys[self.index].clone(), node.chld[self.index]);
                self.index += 1;
                return Ok(Some(entry));
            }

            let next = node.next;
            self.tree.nodes.release(leaf)?;
            self.leaf = None;
            if let Some(next) = next {
                self.tree.nodes.retain(next)?;
                self.leaf = Some(next);
                self.index = 0;
            }
        }
    }
}

impl<N: NodeStore> Iterator for BTreeIter<'_, N> {
    type Item = Result<(String, RecordId), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

impl<N: NodeStore> Drop for BTreeIter<'_, N> {
    fn drop(&mut self) {
        if let Some(leaf) = self.leaf.take() {
            // Nothing to report to; a failed release only delays eviction.
            let _ = self.tree.nodes.release(leaf);
        }
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// The backing cache failed.
    Cache(CacheError),
    /// A referenced node does not exist.
    MissingNode(RecordId),
    /// Key does not fit a node.
    KeyTooLong(usize),
    /// Tree order outside the supported range.
    InvalidOrder(usize),
    /// A structural invariant does not hold.
    Invariant(String),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache(e) => write!(f, "cache error: {e}"),
            Self::MissingNode(id) => write!(f, "btree node {id} not found"),
            Self::KeyTooLong(len) => {
                write!(f, "key of {len} bytes exceeds {MAX_KEY_LEN} bytes")
            }
            Self::InvalidOrder(max) => write!(
                f,
                "tree order {max} is outside {}..={}",
                TreeOrder::MIN_MAX,
                TreeOrder::MAX_MAX
            ),
            Self::Invariant(msg) => write!(f, "btree invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CacheError> for BTreeError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}
