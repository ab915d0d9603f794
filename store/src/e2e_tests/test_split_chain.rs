//! Inserting one more key than a node holds splits the root, and the leaf
//! chain still visits every key once in order.

use crate::e2e_tests::helpers::{TestDb, small_order};
use crate::storage::btree::{BTREE_MAX, BTreeNode};
use crate::testing::three_letter_keys;
use crate::{IndexKind, RecordId, StoreOptions};

#[test]
fn test_root_split_keeps_leaf_chain() {
    let test_db = TestDb::new(StoreOptions::default());
    let mut db = test_db.create();
    let keys = three_letter_keys(BTREE_MAX + 1);
    for (i, key) in keys.iter().enumerate() {
        db.index_add(IndexKind::SequenceName, key, RecordId(1000 + i as u64))
            .expect("add");
    }
    db.close().expect("close");

    // Walk the chain before anything else pulls the leaves into the cache.
    let mut db = test_db.open();
    let entries = db
        .index_iterate(IndexKind::SequenceName, None)
        .expect("iterate");
    let walked: Vec<&String> = entries.iter().map(|(key, _)| key).collect();
    assert_eq!(walked, keys.iter().collect::<Vec<_>>());
    for (i, (_, rec)) in entries.iter().enumerate() {
        assert_eq!(rec.get(), 1000 + i as u64);
    }

    let root = db
        .header()
        .expect("header")
        .seq_index
        .expect("root");
    assert!(!db.read::<BTreeNode>(root).expect("root node").leaf);

    let stats = db.index_check(IndexKind::SequenceName).expect("valid");
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.entries, keys.len());
}

#[test]
fn test_iterate_freshly_opened_index() {
    let mut test_db = TestDb::new(small_order(4));
    let mut db = test_db.create();
    for i in 0..20 {
        db.add_contig(crate::objects::Contig::new(format!("ctg{i:02}")))
            .expect("add");
    }
    db.close().expect("close");

    test_db.options.cache_capacity = StoreOptions::default().cache_capacity;
    let mut db = test_db.open();
    let names: Vec<String> = db
        .index_iterate(IndexKind::ContigName, None)
        .expect("iterate")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("ctg{i:02}")).collect();
    assert_eq!(names, expected);

    let from_middle = db
        .index_iterate(IndexKind::ContigName, Some("ctg13"))
        .expect("iterate");
    assert_eq!(from_middle.len(), 7);
}

#[test]
fn test_many_splits_small_order() {
    let test_db = TestDb::new(small_order(4));
    let mut db = test_db.create();
    let keys = three_letter_keys(200);
    // Insert in a scrambled but deterministic order.
    for i in 0..keys.len() {
        let j = (i * 77) % keys.len();
        db.index_add(IndexKind::ContigName, &keys[j], RecordId(j as u64 + 1))
            .expect("add");
    }
    let stats = db.index_check(IndexKind::ContigName).expect("valid");
    assert!(stats.depth >= 3);
    db.close().expect("close");

    let mut db = test_db.open();
    for (j, key) in keys.iter().enumerate() {
        assert_eq!(
            db.index_query(IndexKind::ContigName, key, false).expect("query"),
            Some(RecordId(j as u64 + 1))
        );
    }
}
