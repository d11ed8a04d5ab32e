use chrono::{NaiveDate, TimeZone, Utc};

use tally_io::SqliteStore;
use tally_recon::error::StoreError;
use tally_recon::model::{Provenance, Record};
use tally_recon::store::{apply_deletions, apply_inserts, CanonicalStore, LabelPattern, RecordFilter};

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn rec(period: &str, label: &str, qty: i64, provenance: Provenance) -> Record {
    Record::new(
        day(period),
        label,
        qty,
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        provenance,
    )
    .unwrap()
}

#[test]
fn open_missing_store_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.db");
    let err = SqliteStore::open(&path).err().unwrap();
    assert!(matches!(err, StoreError::Unavailable(_)));
    // opening must not create the file
    assert!(!path.exists());
}

#[test]
fn open_foreign_database_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("other.db");
    std::fs::write(&path, b"definitely not sqlite").unwrap();
    assert!(matches!(SqliteStore::open(&path), Err(StoreError::Unavailable(_))));
}

#[test]
fn init_then_open_persists_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.db");
    {
        let mut store = SqliteStore::init(&path).unwrap();
        store.insert_record(&rec("2024-01-05", "Dunwoody", 100, Provenance::RawImport)).unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    // init is safe to repeat
    assert_eq!(SqliteStore::init(&path).unwrap().count().unwrap(), 1);
}

#[test]
fn filters_exclude_adjustments_and_legacy_labels() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStore::init(&dir.path().join("tally.db")).unwrap();
    let batch = vec![
        rec("2024-01-05", "Dunwoody", 100, Provenance::RawImport),
        rec("2024-01-05", "Data Reconciliation", 20, Provenance::ReconciliationAdjustment),
        rec("2024-01-12", "Spreadsheet Alignment", 7, Provenance::RawImport),
        rec("2024-02-02", "Roswell", 40, Provenance::RawImport),
    ];
    let report = apply_inserts(&mut store, &batch);
    assert_eq!(report.committed.len(), 4);

    let filter = RecordFilter::all().without_adjustments(&["%Reconciliation%", "%Alignment%"]);
    let labels: Vec<String> = store
        .enumerate_records(&filter)
        .unwrap()
        .iter()
        .map(|r| r.source_label().to_string())
        .collect();
    assert_eq!(labels, vec!["Dunwoody", "Roswell"]);

    let january = RecordFilter::all().period_range(Some(day("2024-01-01")), Some(day("2024-01-31")));
    assert_eq!(store.enumerate_records(&january).unwrap().len(), 3);
}

#[test]
fn label_filter_folds_non_ascii_case() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStore::init(&dir.path().join("tally.db")).unwrap();
    let batch = vec![
        rec("2024-01-05", "ÉCOLE SAINT-JEAN", 30, Provenance::RawImport),
        rec("2024-01-05", "école saint-jean", 20, Provenance::RawImport),
        rec("2024-01-05", "Roswell", 40, Provenance::RawImport),
    ];
    apply_inserts(&mut store, &batch);

    let filter = RecordFilter::all().label(LabelPattern::new("école%"));
    let totals: Vec<u64> = store
        .enumerate_records(&filter)
        .unwrap()
        .iter()
        .map(|r| r.quantity())
        .collect();
    assert_eq!(totals, vec![30, 20]);
}

#[test]
fn persisted_record_cannot_be_inserted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStore::init(&dir.path().join("tally.db")).unwrap();
    store.insert_record(&rec("2024-01-05", "Dunwoody", 100, Provenance::RawImport)).unwrap();
    let persisted = store.enumerate_records(&RecordFilter::all()).unwrap();
    assert!(matches!(
        store.insert_record(&persisted[0]),
        Err(StoreError::Rejected(_))
    ));
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn deletions_touch_only_supplied_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteStore::init(&dir.path().join("tally.db")).unwrap();
    let a = store.insert_record(&rec("2024-01-05", "A", 1, Provenance::RawImport)).unwrap();
    let b = store.insert_record(&rec("2024-01-05", "B", 1, Provenance::RawImport)).unwrap();
    let c = store.insert_record(&rec("2024-01-05", "C", 1, Provenance::RawImport)).unwrap();

    assert_eq!(apply_deletions(&mut store, &[a, c, 9999]).unwrap(), 2);
    assert_eq!(apply_deletions(&mut store, &[]).unwrap(), 0);
    let left: Vec<_> = store
        .enumerate_records(&RecordFilter::all())
        .unwrap()
        .iter()
        .filter_map(Record::id)
        .collect();
    assert_eq!(left, vec![b]);
}
