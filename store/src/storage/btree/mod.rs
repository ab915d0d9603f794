//! Disk B+Tree over string keys.

pub mod node;
pub mod store;
pub mod tree;

pub use node::{BTreeNode, MAX_KEY_LEN, NodeFormat};
pub use store::{CachedNodes, MemoryNodes, NodeStore};
pub use tree::{BTREE_MAX, BTREE_MIN, BTree, BTreeError, BTreeIter, TreeOrder, TreeStats};
