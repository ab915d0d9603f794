//! In-memory object cache with locking and dirty tracking.

pub mod item;
pub mod table;

pub use item::CachedItem;
pub use table::{CacheError, CacheStats, CacheTable, DEFAULT_CAPACITY, SlotKey};
