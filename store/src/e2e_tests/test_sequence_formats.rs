//! Sequences of every format survive a commit and reopen unchanged.

use crate::e2e_tests::helpers::TestDb;
use crate::objects::{Seq, SeqFormat, SeqTech};
use crate::{RecordId, StoreOptions};

fn sample(format: SeqFormat, name: &str) -> Seq {
    let bases = b"ACGTACGTAC".to_vec();
    let conf = match format {
        SeqFormat::Packed => vec![0, 10, 20, 30, 40, 50, 60, 63, 5, 1],
        SeqFormat::Compressed => vec![20, 20, 20, 20, 31, 31, 2, 40, 40, 40],
        SeqFormat::FourChannel => (0..40).collect(),
    };
    #[allow(clippy::expect_used)]
    let mut seq = Seq::new(name, bases, conf, format).expect("valid sequence");
    seq.tech = SeqTech::Sanger;
    seq.trace_name = format!("{name}.scf");
    seq
}

#[test]
fn test_all_formats_roundtrip_through_file() {
    let test_db = TestDb::new(StoreOptions::default());
    let mut db = test_db.create();
    let seqs = [
        sample(SeqFormat::Packed, "read_a"),
        sample(SeqFormat::Compressed, "read_b"),
        sample(SeqFormat::FourChannel, "read_c"),
    ];
    let recs: Vec<RecordId> = seqs
        .iter()
        .map(|seq| db.add_sequence(seq.clone()).expect("add"))
        .collect();
    db.close().expect("close");

    let mut db = test_db.open();
    assert_eq!(db.header().expect("header").num_seqs, 3);
    for (seq, &rec) in seqs.iter().zip(&recs) {
        assert_eq!(db.find_sequence(&seq.name).expect("find"), Some(rec));
        assert_eq!(db.read::<Seq>(rec).expect("read"), seq);
    }
}

#[test]
fn test_bad_sequence_fails_commit_not_store() {
    let test_db = TestDb::new(StoreOptions::default());
    let mut db = test_db.create();
    #[allow(clippy::expect_used)]
    let bad = Seq::new("read_n", b"ACNT".to_vec(), vec![1, 2, 3, 4], SeqFormat::Packed)
        .expect("lengths are valid");
    let rec = db.add_sequence(bad).expect("add");
    assert!(db.commit().is_err());

    // Dropping the unencodable record lets the rest commit.
    db.discard(rec).expect("discard");
    db.commit().expect("commit");
}
