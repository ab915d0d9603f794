//! Connection handle.
//!
//! A [`Database`] owns one record store and the cache in front of it. The
//! header record (#1) names the root of each name index; index operations
//! open the tree on demand through the cache and write a changed root back
//! to the header.
//!
//! Nothing reaches the store until [`Database::commit`], except records
//! created through [`Database::create`] which exist, empty, from the start.

use std::path::Path;

use tracing::info;

use crate::objects::header::SCHEMA_VERSION;
use crate::objects::interface::{ObjectError, ObjectInterface};
use crate::objects::{CodecContext, Contig, DatabaseHeader, Seq, StoredObject};
use crate::storage::btree::{
    BTree, BTreeError, BTreeNode, CachedNodes, NodeFormat, TreeOrder, TreeStats,
};
use crate::storage::cache::{CacheError, CacheStats, CacheTable, DEFAULT_CAPACITY};
use crate::storage::file::{DatabaseFile, FileError};
use crate::storage::indexes::IndexKind;
use crate::storage::io::{RecordStore, StorageError};
use crate::storage::record::{LockMode, RecordId, RecordInfo, View};

/// Settings threaded through a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Items kept resident before eviction starts.
    pub cache_capacity: usize,
    /// Wire format for B+Tree nodes.
    pub node_format: NodeFormat,
    /// Rewrite nodes on open when the stored format differs.
    pub migrate_on_open: bool,
    pub order: TreeOrder,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            node_format: NodeFormat::default(),
            migrate_on_open: false,
            order: TreeOrder::default(),
        }
    }
}

/// A connection to an assembly database.
pub struct Database<S: RecordStore> {
    store: S,
    cache: CacheTable,
    options: StoreOptions,
}

impl Database<DatabaseFile> {
    /// Create a new database file. The path must not exist.
    pub fn create_file(path: &Path, options: StoreOptions) -> Result<Self, DatabaseError> {
        Self::create(DatabaseFile::create(path)?, options)
    }

    /// Open an existing database file.
    pub fn open_file(path: &Path, options: StoreOptions) -> Result<Self, DatabaseError> {
        Self::open(DatabaseFile::open(path)?, options)
    }

    /// Open a database file, creating it if it does not exist.
    pub fn open_or_create_file(path: &Path, options: StoreOptions) -> Result<Self, DatabaseError> {
        if path.exists() {
            Self::open_file(path, options)
        } else {
            Self::create_file(path, options)
        }
    }
}

impl<S: RecordStore> Database<S> {
    /// Initialise an empty store: header plus one empty leaf per index.
    pub fn create(mut store: S, options: StoreOptions) -> Result<Self, DatabaseError> {
        let ctx = CodecContext {
            node_format: options.node_format,
        };
        let rec = store.create_object(&DatabaseHeader::new(options.node_format), &ctx)?;
        if rec != RecordId::HEADER {
            return Err(DatabaseError::MissingHeader(format!(
                "store is not empty, header landed at {rec}"
            )));
        }

        let mut db = Self {
            store,
            cache: CacheTable::new(options.cache_capacity, ctx),
            options,
        };
        for index in IndexKind::ALL {
            let root = db.cache.insert_new(&mut db.store, BTreeNode::new(true))?;
            index.set_root(db.header_mut()?, root);
        }
        db.commit()?;
        info!(format = %options.node_format, "created database");
        Ok(db)
    }

    /// Attach to an initialised store.
    ///
    /// A node format other than the one requested fails with
    /// `FormatMismatch` unless `migrate_on_open` is set.
    pub fn open(store: S, options: StoreOptions) -> Result<Self, DatabaseError> {
        let ctx = CodecContext {
            node_format: options.node_format,
        };
        let mut db = Self {
            store,
            cache: CacheTable::new(options.cache_capacity, ctx),
            options,
        };

        let header = match db.header() {
            Ok(header) => header.clone(),
            Err(DatabaseError::Cache(CacheError::Object(ObjectError::Storage(
                StorageError::RecordNotFound(_),
            )))) => {
                return Err(DatabaseError::MissingHeader("no header record".to_string()));
            }
            Err(e) => return Err(e),
        };
        if header.schema_version != SCHEMA_VERSION {
            return Err(DatabaseError::UnsupportedSchema(header.schema_version));
        }
        for index in IndexKind::ALL {
            if index.root(&header).is_none() {
                return Err(DatabaseError::MissingHeader(format!("no {index} index root")));
            }
        }

        if header.node_format != options.node_format {
            if !options.migrate_on_open {
                return Err(DatabaseError::FormatMismatch {
                    stored: header.node_format,
                    requested: options.node_format,
                });
            }
            db.cache.set_context(CodecContext {
                node_format: header.node_format,
            });
            db.migrate_node_format(options.node_format)?;
        }

        info!(
            format = %header.node_format,
            contigs = header.num_contigs,
            seqs = header.num_seqs,
            "opened database"
        );
        Ok(db)
    }

    #[must_use]
    pub const fn options(&self) -> &StoreOptions {
        &self.options
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Direct access to the record store, bypassing the cache.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub const fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The header record.
    pub fn header(&mut self) -> Result<&DatabaseHeader, DatabaseError> {
        Ok(self
            .cache
            .get::<DatabaseHeader, S>(&mut self.store, RecordId::HEADER, LockMode::Read)?)
    }

    fn header_mut(&mut self) -> Result<&mut DatabaseHeader, DatabaseError> {
        Ok(self
            .cache
            .get_mut::<DatabaseHeader, S>(&mut self.store, RecordId::HEADER)?)
    }

    /// Flush every change and make it durable.
    pub fn commit(&mut self) -> Result<usize, DatabaseError> {
        Ok(self.cache.commit(&mut self.store)?)
    }

    /// Commit, release every lock and hand back the store.
    pub fn close(mut self) -> Result<S, DatabaseError> {
        self.commit()?;
        self.cache.forget_all(&mut self.store)?;
        Ok(self.store)
    }

    // ========== Indices ==========

    /// Run `f` against an index tree, recording a new root if it changed.
    fn with_index<R>(
        &mut self,
        index: IndexKind,
        f: impl FnOnce(&mut BTree<CachedNodes<'_, S>>) -> Result<R, BTreeError>,
    ) -> Result<R, DatabaseError> {
        let root = index
            .root(self.header()?)
            .ok_or_else(|| DatabaseError::MissingHeader(format!("no {index} index root")))?;

        let mut tree = BTree::open(
            CachedNodes::new(&mut self.cache, &mut self.store),
            root,
            self.options.order,
        );
        let result = f(&mut tree);
        let new_root = tree.root();

        // Record the new root even when `f` failed part way through.
        if new_root != root {
            index.set_root(self.header_mut()?, new_root);
        }
        Ok(result?)
    }

    /// First record whose name equals `name`, or starts with it when
    /// `prefix` is set.
    pub fn index_query(
        &mut self,
        index: IndexKind,
        name: &str,
        prefix: bool,
    ) -> Result<Option<RecordId>, DatabaseError> {
        self.with_index(index, |tree| tree.search(name, prefix))
    }

    /// Every record whose name starts with `prefix`, in name order.
    pub fn index_query_all(
        &mut self,
        index: IndexKind,
        prefix: &str,
    ) -> Result<Vec<RecordId>, DatabaseError> {
        self.with_index(index, |tree| tree.search_all(prefix))
    }

    pub fn index_add(
        &mut self,
        index: IndexKind,
        name: &str,
        rec: RecordId,
    ) -> Result<(), DatabaseError> {
        self.with_index(index, |tree| tree.insert(name, rec))
    }

    /// Remove `name`, or only its pairing with `rec` when given. Returns
    /// whether an entry was removed.
    pub fn index_remove(
        &mut self,
        index: IndexKind,
        name: &str,
        rec: Option<RecordId>,
    ) -> Result<bool, DatabaseError> {
        self.with_index(index, |tree| match rec {
            Some(rec) => tree.delete_record(name, rec),
            None => tree.delete(name),
        })
    }

    /// Entries in name order from the first name `>= start`.
    pub fn index_iterate(
        &mut self,
        index: IndexKind,
        start: Option<&str>,
    ) -> Result<Vec<(String, RecordId)>, DatabaseError> {
        self.with_index(index, |tree| tree.iter(start)?.collect())
    }

    /// Verify an index tree.
    pub fn index_check(&mut self, index: IndexKind) -> Result<TreeStats, DatabaseError> {
        self.with_index(index, |tree| tree.check())
    }

    // ========== Objects ==========

    /// Store a new object. It is written on the next commit.
    pub fn insert<T: StoredObject>(&mut self, object: T) -> Result<RecordId, DatabaseError> {
        Ok(self.cache.insert_new(&mut self.store, object)?)
    }

    pub fn read<T: StoredObject>(&mut self, rec: RecordId) -> Result<&T, DatabaseError> {
        Ok(self.cache.get::<T, S>(&mut self.store, rec, LockMode::Read)?)
    }

    /// Mutable access; locks the record `ReadWrite` and marks it dirty.
    pub fn read_mut<T: StoredObject>(&mut self, rec: RecordId) -> Result<&mut T, DatabaseError> {
        Ok(self.cache.get_mut::<T, S>(&mut self.store, rec)?)
    }

    /// Write a changed object back to the store ahead of commit.
    pub fn write(&mut self, rec: RecordId) -> Result<(), DatabaseError> {
        Ok(self.cache.flush(&mut self.store, rec)?)
    }

    /// Drop unflushed changes to a record.
    pub fn discard(&mut self, rec: RecordId) -> Result<(), DatabaseError> {
        Ok(self.cache.abandon(&mut self.store, rec)?)
    }

    pub fn destroy(&mut self, rec: RecordId) -> Result<(), DatabaseError> {
        Ok(self.cache.destroy(&mut self.store, rec)?)
    }

    // ========== Locks ==========

    pub fn lock(&mut self, rec: RecordId, mode: LockMode) -> Result<View, DatabaseError> {
        Ok(self.store.lock_object(rec, mode)?)
    }

    pub fn unlock(&mut self, view: View) -> Result<(), DatabaseError> {
        Ok(self.store.unlock_object(view)?)
    }

    pub fn upgrade(&mut self, view: View, mode: LockMode) -> Result<(), DatabaseError> {
        Ok(self.store.upgrade_object(view, mode)?)
    }

    pub fn abandon(&mut self, view: View) -> Result<(), DatabaseError> {
        Ok(self.store.abandon_object(view)?)
    }

    pub fn info(&self, view: View) -> Result<RecordInfo, DatabaseError> {
        Ok(self.store.object_info(view)?)
    }

    // ========== Sequences and contigs ==========

    /// Store a sequence, index its name and count it in the header.
    pub fn add_sequence(&mut self, seq: Seq) -> Result<RecordId, DatabaseError> {
        let name = seq.name.clone();
        let rec = self.insert(seq)?;
        self.index_add(IndexKind::SequenceName, &name, rec)?;
        self.header_mut()?.num_seqs += 1;
        Ok(rec)
    }

    pub fn find_sequence(&mut self, name: &str) -> Result<Option<RecordId>, DatabaseError> {
        self.index_query(IndexKind::SequenceName, name, false)
    }

    /// Store a contig, index its name and count it in the header.
    pub fn add_contig(&mut self, contig: Contig) -> Result<RecordId, DatabaseError> {
        let name = contig.name.clone();
        let rec = self.insert(contig)?;
        self.index_add(IndexKind::ContigName, &name, rec)?;
        self.header_mut()?.num_contigs += 1;
        Ok(rec)
    }

    pub fn find_contig(&mut self, name: &str) -> Result<Option<RecordId>, DatabaseError> {
        self.index_query(IndexKind::ContigName, name, false)
    }

    // ========== Format migration ==========

    /// Rewrite every index node in `format` and commit.
    pub fn migrate_node_format(&mut self, format: NodeFormat) -> Result<usize, DatabaseError> {
        let from = self.header()?.node_format;
        if from == format {
            return Ok(0);
        }

        // Everything must be decoded under the old format before the switch.
        let mut nodes = 0;
        for index in IndexKind::ALL {
            let ids = self.with_index(index, |tree| tree.node_ids())?;
            for id in ids {
                self.cache.get_mut::<BTreeNode, S>(&mut self.store, id)?;
                nodes += 1;
            }
        }
        self.header_mut()?.node_format = format;
        self.cache.set_context(CodecContext {
            node_format: format,
        });
        self.options.node_format = format;
        self.commit()?;

        info!(%from, to = %format, nodes, "migrated node format");
        Ok(nodes)
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Index tree error.
    BTree(BTreeError),
    /// Cache error.
    Cache(CacheError),
    /// Record store error outside the cache.
    Object(ObjectError),
    /// File I/O error.
    File(FileError),
    /// The database uses a different node format than requested.
    FormatMismatch {
        stored: NodeFormat,
        requested: NodeFormat,
    },
    /// Header schema this build cannot read.
    UnsupportedSchema(u32),
    /// The header record is absent or incomplete.
    MissingHeader(String),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BTree(e) => write!(f, "index error: {e}"),
            Self::Cache(e) => write!(f, "cache error: {e}"),
            Self::Object(e) => write!(f, "object error: {e}"),
            Self::File(e) => write!(f, "file error: {e}"),
            Self::FormatMismatch { stored, requested } => write!(
                f,
                "database uses {stored} nodes but {requested} was requested"
            ),
            Self::UnsupportedSchema(v) => write!(f, "unsupported schema version {v}"),
            Self::MissingHeader(msg) => write!(f, "bad database header: {msg}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BTree(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::Object(e) => Some(e),
            Self::File(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        match e {
            BTreeError::Cache(e) => Self::Cache(e),
            other => Self::BTree(other),
        }
    }
}

impl From<CacheError> for DatabaseError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}

impl From<ObjectError> for DatabaseError {
    fn from(e: ObjectError) -> Self {
        Self::Object(e)
    }
}

impl From<FileError> for DatabaseError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{SeqFormat, Track};
    use crate::storage::memory::MemoryStore;

    fn small_options() -> StoreOptions {
        StoreOptions {
            cache_capacity: 16,
            order: TreeOrder::new(4).expect("order"),
            ..StoreOptions::default()
        }
    }

    #[test]
    fn test_create_lays_out_header() {
        let mut db = Database::create(MemoryStore::new(), small_options()).expect("create");
        let header = db.header().expect("header").clone();
        assert_eq!(header.schema_version, SCHEMA_VERSION);
        assert_eq!(header.seq_index, Some(RecordId(2)));
        assert_eq!(header.contig_index, Some(RecordId(3)));
        assert_eq!(db.index_query_all(IndexKind::SequenceName, "").expect("query"), vec![]);
    }

    #[test]
    fn test_create_rejects_used_store() {
        let mut store = MemoryStore::new();
        store
            .create_object(&Track::new(0, 1), &CodecContext::default())
            .expect("create");
        assert!(matches!(
            Database::create(store, small_options()),
            Err(DatabaseError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_open_empty_store() {
        assert!(matches!(
            Database::open(MemoryStore::new(), small_options()),
            Err(DatabaseError::MissingHeader(_))
        ));
    }

    #[test]
    fn test_sequence_lifecycle() {
        let mut db = Database::create(MemoryStore::new(), small_options()).expect("create");
        let seq = Seq::new("read1", b"ACGT".to_vec(), vec![10, 20, 30, 40], SeqFormat::Packed)
            .expect("seq");
        let rec = db.add_sequence(seq.clone()).expect("add");
        assert_eq!(db.find_sequence("read1").expect("find"), Some(rec));
        assert_eq!(db.find_sequence("read").expect("find"), None);
        assert_eq!(db.read::<Seq>(rec).expect("read"), &seq);
        assert_eq!(db.header().expect("header").num_seqs, 1);
        db.commit().expect("commit");

        db.read_mut::<Seq>(rec).expect("read_mut").mapping_qual = 60;
        db.write(rec).expect("write");
        let store = db.close().expect("close");
        assert_eq!(store.open_views(), 0);

        let mut db = Database::open(store, small_options()).expect("open");
        assert_eq!(db.read::<Seq>(rec).expect("read").mapping_qual, 60);
    }

    #[test]
    fn test_root_change_recorded_in_header() {
        let mut db = Database::create(MemoryStore::new(), small_options()).expect("create");
        let before = db.header().expect("header").contig_index;
        for i in 0..20 {
            db.add_contig(Contig::new(format!("ctg{i:02}"))).expect("add");
        }
        let after = db.header().expect("header").contig_index;
        assert_ne!(before, after);
        assert_eq!(db.header().expect("header").num_contigs, 20);

        let stats = db.index_check(IndexKind::ContigName).expect("check");
        assert_eq!(stats.entries, 20);
        assert!(stats.depth > 1);

        let store = db.close().expect("close");
        let mut db = Database::open(store, small_options()).expect("open");
        let names: Vec<String> = db
            .index_iterate(IndexKind::ContigName, Some("ctg15"))
            .expect("iterate")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["ctg15", "ctg16", "ctg17", "ctg18", "ctg19"]);
    }

    #[test]
    fn test_index_remove() {
        let mut db = Database::create(MemoryStore::new(), small_options()).expect("create");
        db.index_add(IndexKind::SequenceName, "dup", RecordId(40)).expect("add");
        db.index_add(IndexKind::SequenceName, "dup", RecordId(41)).expect("add");
        assert!(db
            .index_remove(IndexKind::SequenceName, "dup", Some(RecordId(41)))
            .expect("remove"));
        assert_eq!(
            db.index_query_all(IndexKind::SequenceName, "dup").expect("query"),
            vec![RecordId(40)]
        );
        assert!(db.index_remove(IndexKind::SequenceName, "dup", None).expect("remove"));
        assert!(!db.index_remove(IndexKind::SequenceName, "dup", None).expect("remove"));
    }

    #[test]
    fn test_format_mismatch() {
        let fixed = StoreOptions {
            node_format: NodeFormat::Fixed32,
            ..small_options()
        };
        let mut db = Database::create(MemoryStore::new(), fixed).expect("create");
        for i in 0..30 {
            db.index_add(IndexKind::SequenceName, &format!("s{i:03}"), RecordId(100 + i))
                .expect("add");
        }
        let store = db.close().expect("close");

        assert!(matches!(
            Database::open(store, small_options()),
            Err(DatabaseError::FormatMismatch {
                stored: NodeFormat::Fixed32,
                requested: NodeFormat::Varint,
            })
        ));
    }

    #[test]
    fn test_migrate_on_open_rewrites_nodes() {
        let fixed = StoreOptions {
            node_format: NodeFormat::Fixed32,
            ..small_options()
        };
        let mut db = Database::create(MemoryStore::new(), fixed).expect("create");
        for i in 0..30 {
            db.index_add(IndexKind::SequenceName, &format!("s{i:03}"), RecordId(100 + i))
                .expect("add");
        }
        let root = db.header().expect("header").seq_index.expect("root");
        let store = db.close().expect("close");
        let fixed_len = store.committed(root).expect("root image").len();

        let migrate = StoreOptions {
            migrate_on_open: true,
            ..small_options()
        };
        let db = Database::open(store, migrate).expect("migrate");
        let store = db.close().expect("close");
        assert!(store.committed(root).expect("root image").len() < fixed_len);

        let mut db = Database::open(store, small_options()).expect("reopen");
        assert_eq!(db.header().expect("header").node_format, NodeFormat::Varint);
        assert_eq!(
            db.index_query(IndexKind::SequenceName, "s017", false).expect("query"),
            Some(RecordId(117))
        );
        db.index_check(IndexKind::SequenceName).expect("valid");
    }
}
