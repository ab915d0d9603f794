//! Index operations with a cache far smaller than the tree, so nearly every
//! node access misses and leaves are evicted between steps.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::database::{Database, StoreOptions};
use crate::e2e_tests::helpers::small_order;
use crate::storage::memory::MemoryStore;
use crate::{IndexKind, RecordId};

fn tiny_cache() -> StoreOptions {
    StoreOptions {
        cache_capacity: 1,
        ..small_order(5)
    }
}

fn assert_matches_model(db: &mut Database<MemoryStore>, model: &BTreeMap<String, RecordId>) {
    let entries = db
        .index_iterate(IndexKind::SequenceName, None)
        .expect("iterate");
    let expected: Vec<(String, RecordId)> =
        model.iter().map(|(key, &rec)| (key.clone(), rec)).collect();
    assert_eq!(entries, expected);
    let stats = db.index_check(IndexKind::SequenceName).expect("valid");
    assert_eq!(stats.entries, model.len());
}

#[test]
fn test_randomized_index_with_tiny_cache() {
    let mut rng = StdRng::seed_from_u64(0x0c0f_fee5);
    let mut db = Database::create(MemoryStore::new(), tiny_cache()).expect("create");
    let mut model = BTreeMap::new();

    for step in 1..=1500u64 {
        let key = format!("read{:03}", rng.random_range(0..300));
        if model.contains_key(&key) {
            if rng.random_bool(0.6) {
                assert!(
                    db.index_remove(IndexKind::SequenceName, &key, None)
                        .expect("remove")
                );
                model.remove(&key);
            }
        } else {
            db.index_add(IndexKind::SequenceName, &key, RecordId(step + 10))
                .expect("add");
            model.insert(key, RecordId(step + 10));
        }

        if step % 50 == 0 {
            db.commit().expect("commit");
        }
        if step % 250 == 0 {
            assert_matches_model(&mut db, &model);
        }
    }

    let store = db.close().expect("close");
    let mut db = Database::open(store, tiny_cache()).expect("reopen");
    assert_matches_model(&mut db, &model);
    for (key, &rec) in model.iter().step_by(9) {
        assert_eq!(
            db.index_query(IndexKind::SequenceName, key, false).expect("query"),
            Some(rec)
        );
    }
    assert!(db.cache_stats().evictions > 0);
}
