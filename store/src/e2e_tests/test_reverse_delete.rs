//! Deleting every key in reverse order keeps each node within its bounds.

use crate::e2e_tests::helpers::{TestDb, small_order};
use crate::testing::three_letter_keys;
use crate::{IndexKind, RecordId};

#[test]
fn test_reverse_delete_keeps_occupancy() {
    let max = 6;
    let test_db = TestDb::new(small_order(max));
    let mut db = test_db.create();
    let keys = three_letter_keys(max * 15);
    for (i, key) in keys.iter().enumerate() {
        db.index_add(IndexKind::SequenceName, key, RecordId(i as u64 + 1))
            .expect("add");
    }
    db.commit().expect("commit");

    for (removed, key) in keys.iter().rev().enumerate() {
        assert!(
            db.index_remove(IndexKind::SequenceName, key, None)
                .expect("remove")
        );
        let stats = db.index_check(IndexKind::SequenceName).expect("valid");
        assert_eq!(stats.entries, keys.len() - removed - 1);
        assert_eq!(
            db.index_query(IndexKind::SequenceName, key, false)
                .expect("query"),
            None
        );
    }
    db.close().expect("close");

    let mut db = test_db.open();
    let stats = db.index_check(IndexKind::SequenceName).expect("valid");
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.nodes, 1);
}
