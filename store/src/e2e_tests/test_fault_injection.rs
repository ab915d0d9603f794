//! Commits that fail on injected write or sync faults can be retried
//! without losing or corrupting index entries.

use crate::database::Database;
use crate::e2e_tests::helpers::small_order;
use crate::storage::memory::{FaultConfig, MemoryStore};
use crate::{IndexKind, RecordId};

#[test]
fn test_commit_retries_after_faults() {
    let faults = FaultConfig {
        read_error_rate: 0.0,
        write_error_rate: 0.1,
        sync_error_rate: 0.2,
    };
    let store = MemoryStore::with_faults(42, FaultConfig::no_faults());
    let mut db = Database::create(store, small_order(4)).expect("create");

    let mut failed_commits = 0;
    for round in 0..20u64 {
        for i in 0..10u64 {
            let n = round * 10 + i;
            db.index_add(IndexKind::SequenceName, &format!("seq{n:04}"), RecordId(n + 100))
                .expect("index changes stay in the cache");
        }
        db.store_mut().set_fault_config(faults.clone());
        if db.commit().is_err() {
            failed_commits += 1;
        }
        db.store_mut().set_fault_config(FaultConfig::no_faults());
    }
    assert!(failed_commits > 0);
    assert!(db.store().stats().injected_faults > 0);

    db.commit().expect("final commit");
    let store = db.close().expect("close");

    let mut db = Database::open(store, small_order(4)).expect("reopen");
    let stats = db.index_check(IndexKind::SequenceName).expect("valid");
    assert_eq!(stats.entries, 200);
    for n in (0..200u64).step_by(7) {
        assert_eq!(
            db.index_query(IndexKind::SequenceName, &format!("seq{n:04}"), false)
                .expect("query"),
            Some(RecordId(n + 100))
        );
    }
}
