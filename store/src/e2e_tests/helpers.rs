//! Common helpers for end-to-end tests.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::database::{Database, StoreOptions};
use crate::storage::btree::TreeOrder;
use crate::storage::file::DatabaseFile;

/// Options with a small tree order so a handful of keys spans several levels.
#[must_use]
pub fn small_order(max: usize) -> StoreOptions {
    StoreOptions {
        cache_capacity: 64,
        #[allow(clippy::expect_used)]
        order: TreeOrder::new(max).expect("valid order"),
        ..StoreOptions::default()
    }
}

/// A database file in a temporary directory, removed on drop.
pub struct TestDb {
    dir: TempDir,
    pub options: StoreOptions,
}

impl TestDb {
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(options: StoreOptions) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        Self { dir, options }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("assembly.db")
    }

    #[allow(clippy::expect_used)]
    pub fn create(&self) -> Database<DatabaseFile> {
        Database::create_file(&self.path(), self.options).expect("create database")
    }

    #[allow(clippy::expect_used)]
    pub fn open(&self) -> Database<DatabaseFile> {
        Database::open_file(&self.path(), self.options).expect("open database")
    }
}
