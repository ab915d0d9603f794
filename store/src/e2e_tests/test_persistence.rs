//! Committed state survives reopen; uncommitted state does not.

use crate::database::DatabaseError;
use crate::e2e_tests::helpers::{TestDb, small_order};
use crate::objects::{Bin, BinRange, Contig, Track};
use crate::storage::btree::NodeFormat;
use crate::{IndexKind, RecordId, StoreOptions};

#[test]
fn test_uncommitted_changes_are_lost() {
    let test_db = TestDb::new(small_order(4));
    let mut db = test_db.create();
    let rec = db.add_contig(Contig::new("kept")).expect("add");
    db.commit().expect("commit");

    db.add_contig(Contig::new("lost")).expect("add");
    db.read_mut::<Contig>(rec).expect("contig").nseqs = 9;
    drop(db);

    let mut db = test_db.open();
    assert_eq!(db.find_contig("kept").expect("find"), Some(rec));
    assert_eq!(db.find_contig("lost").expect("find"), None);
    assert_eq!(db.read::<Contig>(rec).expect("contig").nseqs, 0);
    assert_eq!(db.header().expect("header").num_contigs, 1);
}

#[test]
fn test_contig_bins_and_tracks_link_up() {
    let test_db = TestDb::new(StoreOptions::default());
    let mut db = test_db.create();

    let track = db
        .insert(Track {
            items: vec![3, 4, 4, 5],
            ..Track::new(1, 128)
        })
        .expect("track");
    let mut bin = Bin::new(0, 512);
    bin.track = Some(track);
    let bin = db.insert(bin).expect("bin");
    let contig = db
        .add_contig(Contig {
            bin: Some(bin),
            ..Contig::new("ctg1")
        })
        .expect("contig");
    db.read_mut::<Bin>(bin).expect("bin").add_range(BinRange {
        start: 10,
        len: 100,
        rec: contig,
        mqual: 30,
        pair: None,
        flags: 0,
    });
    db.close().expect("close");

    let mut db = test_db.open();
    let contig_rec = db.find_contig("ctg1").expect("find").expect("present");
    let bin_rec = db.read::<Contig>(contig_rec).expect("contig").bin.expect("bin");
    let bin = db.read::<Bin>(bin_rec).expect("bin").clone();
    assert_eq!(bin.ranges.len(), 1);
    assert_eq!((bin.start_used, bin.end_used), (10, 109));
    let track_rec = bin.track.expect("track");
    assert_eq!(db.read::<Track>(track_rec).expect("track").items, vec![3, 4, 4, 5]);
}

#[test]
fn test_destroyed_record_is_gone() {
    let test_db = TestDb::new(StoreOptions::default());
    let mut db = test_db.create();
    let rec = db.insert(Track::new(2, 8)).expect("track");
    db.commit().expect("commit");
    db.destroy(rec).expect("destroy");
    db.close().expect("close");

    let mut db = test_db.open();
    assert!(db.read::<Track>(rec).is_err());
    assert!(db.read::<Track>(RecordId(9999)).is_err());
}

#[test]
fn test_fixed32_database_needs_migration() {
    let fixed = StoreOptions {
        node_format: NodeFormat::Fixed32,
        ..small_order(4)
    };
    let test_db = TestDb::new(fixed);
    let mut db = test_db.create();
    for i in 0..40 {
        db.add_contig(Contig::new(format!("c{i:02}"))).expect("add");
    }
    db.close().expect("close");

    let varint = small_order(4);
    assert!(matches!(
        crate::Database::open_file(&test_db.path(), varint),
        Err(DatabaseError::FormatMismatch { .. })
    ));

    let migrate = StoreOptions {
        migrate_on_open: true,
        ..varint
    };
    crate::Database::open_file(&test_db.path(), migrate)
        .expect("migrate")
        .close()
        .expect("close");

    let mut db = crate::Database::open_file(&test_db.path(), varint).expect("reopen");
    assert_eq!(db.header().expect("header").node_format, NodeFormat::Varint);
    let stats = db.index_check(IndexKind::ContigName).expect("valid");
    assert_eq!(stats.entries, 40);
    assert!(db.find_contig("c27").expect("find").is_some());
}

#[test]
fn test_interrupted_commit_rolls_back() {
    let test_db = TestDb::new(small_order(4));
    let mut db = test_db.create();
    for i in 0..10 {
        db.add_contig(Contig::new(format!("c{i:02}"))).expect("add");
    }
    db.commit().expect("commit");

    // Split more nodes, then write only the header before "crashing".
    for i in 10..40 {
        db.add_contig(Contig::new(format!("c{i:02}"))).expect("add");
    }
    db.write(RecordId::HEADER).expect("write header");
    drop(db);

    let mut db = test_db.open();
    assert_eq!(db.header().expect("header").num_contigs, 10);
    let stats = db.index_check(IndexKind::ContigName).expect("valid");
    assert_eq!(stats.entries, 10);
    assert!(db.find_contig("c05").expect("find").is_some());
    assert_eq!(db.find_contig("c25").expect("find"), None);
}
