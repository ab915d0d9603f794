//! Prefix search returns every matching name in sorted order.

use crate::e2e_tests::helpers::{TestDb, small_order};
use crate::objects::Contig;
use crate::{IndexKind, RecordId};

#[test]
fn test_prefix_search_te() {
    let test_db = TestDb::new(small_order(4));
    let mut db = test_db.create();
    let mut recs = Vec::new();
    for name in ["ted", "tell", "temp", "zoo"] {
        recs.push(db.add_contig(Contig::new(name)).expect("add"));
    }
    db.close().expect("close");

    let mut db = test_db.open();
    let found = db
        .index_query_all(IndexKind::ContigName, "te")
        .expect("query");
    assert_eq!(found, recs[..3].to_vec());

    let names: Vec<String> = found
        .iter()
        .map(|&rec| db.read::<Contig>(rec).expect("contig").name.clone())
        .collect();
    assert_eq!(names, ["ted", "tell", "temp"]);

    assert_eq!(
        db.index_query(IndexKind::ContigName, "te", true).expect("query"),
        Some(recs[0])
    );
    assert_eq!(db.find_contig("zoo").expect("find"), Some(recs[3]));
    assert_eq!(db.find_contig("te").expect("find"), None);
    assert_eq!(
        db.index_query_all(IndexKind::ContigName, "x").expect("query"),
        Vec::<RecordId>::new()
    );
}
