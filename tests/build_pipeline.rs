mod support;

use medley_rs::index::{scan_lookup_rows, scan_match_rows};
use medley_rs::persistence::SortedStoreReader;
use medley_rs::{CancelToken, Error, IndexPaths, LookupPair, Medley};
use std::collections::{HashMap, HashSet};
use support::person;
use tempfile::TempDir;

fn build(
    records: Vec<medley_rs::InputRecord>,
    directives: &[&str],
    distance: i32,
    paths: &IndexPaths,
) -> medley_rs::BuildSummary {
    Medley::new()
        .build_all_indexes(records, directives, distance, paths)
        .expect("build")
}

fn match_ids(paths: &IndexPaths) -> HashMap<u64, u32> {
    let reader = SortedStoreReader::open(&paths.id2match).unwrap();
    scan_match_rows(&reader)
        .unwrap()
        .into_iter()
        .map(|row| (row.id.get(), row.match_id.0))
        .collect()
}

#[test]
fn exact_duplicates_share_a_cluster() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Alice", "Smith", "", ""),
        person(2, "Alice", "Smith", "", ""),
        person(3, "Bob", "Jones", "", ""),
    ];

    let summary = build(records, &["&fname,lname"], 0, &paths);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.clusters, 2);

    let clusters = match_ids(&paths);
    assert_eq!(clusters[&1], clusters[&2]);
    assert_ne!(clusters[&1], clusters[&3]);

    // Match2ID groups the duplicates under one id and Bob alone.
    let reader = SortedStoreReader::open(&paths.match2id).unwrap();
    let mut members: HashMap<u32, Vec<u64>> = HashMap::new();
    for row in scan_match_rows(&reader).unwrap() {
        members.entry(row.match_id.0).or_default().push(row.id.get());
    }
    assert_eq!(members[&clusters[&1]], vec![1, 2]);
    assert_eq!(members[&clusters[&3]], vec![3]);
}

#[test]
fn every_input_id_is_covered() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(10, "A", "B", "C", "D"),
        person(11, "", "", "", ""),
        person(12, "E", "", "", ""),
    ];
    build(records, &["fname;lname"], 1, &paths);

    let id2hash = SortedStoreReader::open(&paths.id2hash).unwrap();
    let covered: HashSet<u64> = scan_lookup_rows(&id2hash)
        .unwrap()
        .into_iter()
        .map(|row| row.id.get())
        .collect();
    assert_eq!(covered, HashSet::from([10, 11, 12]));

    let clusters = match_ids(&paths);
    assert_eq!(clusters.len(), 3);
}

#[test]
fn hash_and_id_indexes_are_symmetric() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Ada", "Lovelace", "London", "N1"),
        person(2, "Ada", "Lovelace", "London", "N1"),
        person(3, "Grace", "Hopper", "Arlington", "22201"),
    ];
    build(records, &["&postal;fname,lname;city"], 1, &paths);

    let hash2id = SortedStoreReader::open(&paths.hash2id).unwrap();
    let id2hash = SortedStoreReader::open(&paths.id2hash).unwrap();
    let forward: HashSet<LookupPair> =
        scan_lookup_rows(&hash2id).unwrap().into_iter().collect();
    let backward: HashSet<LookupPair> =
        scan_lookup_rows(&id2hash).unwrap().into_iter().collect();
    assert_eq!(forward, backward);
    assert!(!forward.is_empty());
}

#[test]
fn no_index_carries_duplicate_rows() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Ada", "Lovelace", "London", "N1"),
        person(1, "Ada", "Lovelace", "London", "N1"),
        person(2, "Ada", "Lovelace", "London", "N1"),
    ];
    build(records, &["fname,lname;city", "fname,lname;city"], 1, &paths);

    for path in [
        &paths.hash2id,
        &paths.id2hash,
        &paths.match2id,
        &paths.id2match,
    ] {
        let reader = SortedStoreReader::open(path).unwrap();
        let rows = reader.scan().unwrap();
        let distinct: HashSet<_> = rows.iter().cloned().collect();
        assert_eq!(rows.len(), distinct.len(), "{}", path.display());
    }
}

#[test]
fn rebuild_with_identical_inputs_is_identical() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Ada", "Lovelace", "London", "N1"),
        person(2, "Ado", "Lovelace", "London", "N1"),
        person(3, "Grace", "Hopper", "Arlington", "22201"),
    ];

    build(records.clone(), &["&postal;fname%1,lname;city"], 1, &paths);
    let snapshot = |paths: &IndexPaths| {
        [
            &paths.hash2id,
            &paths.id2hash,
            &paths.match2id,
            &paths.id2match,
        ]
        .map(|p| SortedStoreReader::open(p).unwrap().scan().unwrap())
    };
    let first = snapshot(&paths);

    build(records, &["&postal;fname%1,lname;city"], 1, &paths);
    let second = snapshot(&paths);
    assert_eq!(first, second);
}

#[test]
fn group_deletion_relates_near_matches() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "A", "B", "C", "D"),
        person(2, "A", "B", "C", "E"),
    ];

    build(records, &["fname;lname;city;postal"], 1, &paths);
    let clusters = match_ids(&paths);
    assert_eq!(clusters[&1], clusters[&2]);
}

#[test]
fn required_group_blocks_near_matches() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "A", "B", "C", "D"),
        person(2, "A", "B", "C", "E"),
    ];

    build(records, &["fname;lname;city;&postal"], 1, &paths);
    let clusters = match_ids(&paths);
    assert_ne!(clusters[&1], clusters[&2]);
}

#[test]
fn all_required_plan_is_exact_match_on_required_content() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Ada", "Lovelace", "", ""),
        person(2, "Ada", "Lovelace", "", ""),
        person(3, "Ada", "Byron", "", ""),
    ];

    let summary = build(records, &["&fname;&lname"], 2, &paths);
    // One fingerprint per record: the required content plus the sentinel.
    assert_eq!(summary.lookup_pairs, 3);

    let clusters = match_ids(&paths);
    assert_eq!(clusters[&1], clusters[&2]);
    assert_ne!(clusters[&1], clusters[&3]);
}

#[test]
fn directive_errors_are_fatal_before_data() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![person(1, "A", "B", "C", "D")];

    let err = Medley::new()
        .build_all_indexes(records, &["fname,&lname"], 0, &paths)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::DirectiveSyntax(_))
    ));
    assert!(!paths.hash2id.exists());
}

#[test]
fn cancelled_build_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "A", "B", "C", "D"),
        person(2, "E", "F", "G", "H"),
    ];

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = Medley::new()
        .build_all_indexes_with_cancel(records, &["fname;lname"], 0, &paths, &cancel)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Cancelled)
    ));
    for path in [
        &paths.hash2id,
        &paths.id2hash,
        &paths.match2id,
        &paths.id2match,
    ] {
        assert!(!path.exists());
    }
}

#[test]
fn summary_counts_reflect_published_rows() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(1, "Ada", "Lovelace", "London", "N1"),
        person(2, "Grace", "Hopper", "Arlington", "22201"),
    ];

    let summary = build(records, &["fname;lname"], 0, &paths);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.report.hash2id_rows, summary.lookup_pairs);
    assert_eq!(summary.report.id2hash_rows, summary.lookup_pairs);
    assert_eq!(summary.report.match2id_rows, 2);
    assert_eq!(summary.report.id2match_rows, 2);
    assert_eq!(summary.clusters, 2);

    let id2match = SortedStoreReader::open(&paths.id2match).unwrap();
    assert_eq!(scan_match_rows(&id2match).unwrap().len(), 2);
}

#[test]
fn duplicate_entity_ids_with_same_attributes_are_tolerated() {
    let dir = TempDir::new().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let records = vec![
        person(7, "Ada", "Lovelace", "London", "N1"),
        person(7, "Ada", "Lovelace", "London", "N1"),
    ];

    let summary = build(records, &["fname,lname"], 0, &paths);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.lookup_pairs, 1);

    let clusters = match_ids(&paths);
    assert_eq!(clusters.len(), 1);
    assert!(clusters.contains_key(&7));
}
