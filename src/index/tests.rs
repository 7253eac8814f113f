use std::sync::Arc;

use half::f16;

use super::similarity::{cosine_similarity_f16_f32, f16_from_le_bytes, f16_to_le_bytes};
use super::*;
use crate::embedding::HashingEmbedder;
use crate::store::TmEntry;

const DIM: usize = 384;

fn entry(id: i64, source: &str, target: &str) -> TmEntry {
    TmEntry {
        id,
        tm_id: 1,
        source: source.to_string(),
        target: target.to_string(),
        string_id: None,
        confirmed: false,
        created_at: 0,
        updated_at: 0,
    }
}

fn build(entries: &[TmEntry], version: u64) -> IndexSnapshot {
    let embedder = HashingEmbedder::new(DIM).unwrap();
    let vectors = entries.iter().map(|e| embedder.embed_text(&e.source)).collect();
    let mut builder = SnapshotBuilder::new(1, DIM, "hashing-v1");
    builder.push_batch(entries, vectors).unwrap();
    builder.finish(version, 7, 1_700_000_000_000)
}

fn query(text: &str) -> Vec<f32> {
    HashingEmbedder::new(DIM).unwrap().embed_text(text)
}

#[test]
fn test_cosine_similarity_bounds() {
    let a: Vec<f16> = [1.0f32, 0.0].iter().map(|v| f16::from_f32(*v)).collect();

    assert!((cosine_similarity_f16_f32(&a, &[1.0, 0.0]) - 1.0).abs() < 1e-3);
    assert_eq!(cosine_similarity_f16_f32(&a, &[-1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity_f16_f32(&a, &[0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity_f16_f32(&a, &[1.0]), 0.0);
}

#[test]
fn test_f16_byte_conversion() {
    let values: Vec<f16> = [0.5f32, -1.25, 3.0].iter().map(|v| f16::from_f32(*v)).collect();
    let bytes = f16_to_le_bytes(&values);
    assert_eq!(bytes.len(), 6);
    assert_eq!(f16_from_le_bytes(&bytes).unwrap(), values);
    assert!(f16_from_le_bytes(&bytes[..5]).is_none());
}

#[test]
fn test_search_ranks_and_caps() {
    let snapshot = build(
        &[
            entry(1, "hello", "bonjour"),
            entry(2, "goodbye", "au revoir"),
            entry(3, "hi", "salut"),
        ],
        1,
    );

    let results = snapshot.search(&query("hi there"), 0.3, 2).unwrap();

    assert!(!results.is_empty() && results.len() <= 2);
    assert_eq!(results[0].entry_id, 3);
    assert_eq!(results[0].target, "salut");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|m| m.score >= 0.3 && m.score <= 1.0));
}

#[test]
fn test_search_ties_break_by_entry_id() {
    let snapshot = build(
        &[
            entry(9, "save file", "a"),
            entry(4, "save file", "b"),
            entry(6, "save file", "c"),
        ],
        1,
    );

    let ids: Vec<_> = snapshot
        .search(&query("save file"), 0.0, 10)
        .unwrap()
        .into_iter()
        .map(|m| m.entry_id)
        .collect();
    assert_eq!(ids, vec![4, 6, 9]);
}

#[test]
fn test_search_is_deterministic() {
    let snapshot = build(
        &[
            entry(1, "open the file", "x"),
            entry(2, "close the file", "y"),
            entry(3, "open a window", "z"),
        ],
        1,
    );
    let q = query("open file");

    assert_eq!(
        snapshot.search(&q, 0.1, 5).unwrap(),
        snapshot.search(&q, 0.1, 5).unwrap()
    );
}

#[test]
fn test_search_threshold_and_dimension() {
    let snapshot = build(&[entry(1, "hello", "bonjour")], 1);

    assert!(snapshot.search(&query("hello"), 1.0, 5).unwrap().len() <= 1);
    assert!(snapshot.search(&query("zzzz qqqq"), 0.9, 5).unwrap().is_empty());
    assert!(matches!(
        snapshot.search(&[0.0; 3], 0.5, 5).unwrap_err(),
        IndexError::DimensionMismatch {
            expected: DIM,
            actual: 3
        }
    ));
}

#[test]
fn test_empty_snapshot_searches_empty() {
    let snapshot = SnapshotBuilder::new(1, DIM, "hashing-v1").finish(1, 0, 0);
    assert!(snapshot.is_empty());
    assert!(snapshot.search(&query("hello"), 0.0, 5).unwrap().is_empty());
}

#[test]
fn test_builder_rejects_mismatched_batches() {
    let mut builder = SnapshotBuilder::new(1, DIM, "p");
    let entries = [entry(1, "a", "b"), entry(2, "c", "d")];

    assert!(matches!(
        builder.push_batch(&entries, vec![vec![0.0; DIM]]).unwrap_err(),
        IndexError::CountMismatch { .. }
    ));
    assert!(matches!(
        builder
            .push_batch(&entries, vec![vec![0.0; DIM], vec![0.0; 2]])
            .unwrap_err(),
        IndexError::DimensionMismatch { .. }
    ));
    assert!(builder.is_empty());
}

#[test]
fn test_builder_orders_entries_by_id() {
    let snapshot = build(&[entry(5, "e", "e"), entry(2, "b", "b")], 1);
    let ids: Vec<_> = snapshot.entries().iter().map(|e| e.entry_id).collect();
    assert_eq!(ids, vec![2, 5]);
    assert_eq!(snapshot.revision(), 7);
    assert_eq!(snapshot.provider(), "hashing-v1");
}

#[test]
fn test_registry_versions_move_forward() {
    let registry = SnapshotRegistry::new();
    assert!(registry.get(1).is_none());

    registry.install(build(&[entry(1, "a", "a")], 1)).unwrap();
    let old = registry.get(1).unwrap();
    registry.install(build(&[entry(2, "b", "b")], 2)).unwrap();

    // A reader holding the old Arc keeps a complete snapshot.
    assert_eq!(old.version(), 1);
    assert_eq!(old.entries()[0].entry_id, 1);
    assert_eq!(registry.version(1), Some(2));

    let err = registry.install(build(&[], 2)).unwrap_err();
    assert!(matches!(
        err,
        IndexError::StaleVersion {
            current: 2,
            attempted: 2,
            ..
        }
    ));

    assert!(registry.remove(1).is_some());
    assert!(registry.is_empty());
}

#[test]
fn test_registry_concurrent_readers_see_whole_snapshots() {
    let registry = Arc::new(SnapshotRegistry::new());
    registry.install(build(&[entry(1, "a", "a")], 1)).unwrap();

    std::thread::scope(|scope| {
        let reader = {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                for _ in 0..1000 {
                    let snapshot = registry.get(1).unwrap();
                    assert_eq!(snapshot.len() as u64, snapshot.version());
                }
            })
        };
        for version in 2..=20u64 {
            let entries: Vec<_> = (1..=version as i64).map(|i| entry(i, "x", "y")).collect();
            registry.install(build(&entries, version)).unwrap();
        }
        reader.join().unwrap();
    });
}

#[test]
fn test_snapshot_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("snapshots"));
    let mut original = build(&[entry(1, "hello", "bonjour"), entry(3, "hi", "salut")], 4);
    original.entries[1].string_id = Some("greeting.short".into());
    original.entries[1].confirmed = true;

    let path = store.save(&original).unwrap();
    assert!(path.ends_with("1.snap"));

    let loaded = store.load(1).unwrap().unwrap();
    assert_eq!(loaded, original);
    assert_eq!(
        loaded.search(&query("hi"), 0.5, 1).unwrap(),
        original.search(&query("hi"), 0.5, 1).unwrap()
    );
    assert_eq!(store.list().unwrap(), vec![1]);
}

#[test]
fn test_snapshot_store_missing_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());

    assert!(store.load(42).unwrap().is_none());
    assert!(!store.remove(42).unwrap());

    store.save(&build(&[], 1)).unwrap();
    assert!(store.remove(1).unwrap());
    assert!(store.load(1).unwrap().is_none());
}

#[test]
fn test_snapshot_store_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    std::fs::write(store.path(5), b"definitely not a snapshot").unwrap();

    assert!(matches!(
        store.load(5).unwrap_err(),
        IndexError::Corrupt { .. }
    ));
}

#[test]
fn test_staged_snapshot_is_invisible_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    store.save(&build(&[entry(1, "hello", "bonjour")], 1)).unwrap();

    let abandoned = store.stage(&build(&[], 2)).unwrap();
    assert_eq!(store.load(1).unwrap().unwrap().version(), 1);
    drop(abandoned);
    assert_eq!(store.load(1).unwrap().unwrap().version(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let staged = store.stage(&build(&[], 3)).unwrap();
    staged.commit().unwrap();
    assert_eq!(store.load(1).unwrap().unwrap().version(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_snapshot_store_list_cleans_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    store.save(&build(&[], 1)).unwrap();
    std::fs::write(dir.path().join("9.snap.tmp"), b"partial").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    assert_eq!(store.list().unwrap(), vec![1]);
    assert!(!dir.path().join("9.snap.tmp").exists());
}

#[test]
fn test_registry_get_or_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path());
    let registry = SnapshotRegistry::new();

    assert!(registry.get_or_load(&store, 1, 3).unwrap().is_none());

    store.save(&build(&[entry(1, "a", "a")], 3)).unwrap();
    assert!(registry.get_or_load(&store, 1, 4).unwrap().is_none());

    let loaded = registry.get_or_load(&store, 1, 3).unwrap().unwrap();
    assert_eq!(loaded.version(), 3);
    assert_eq!(registry.version(1), Some(3));

    // Memory already satisfies older versions without touching disk.
    store.remove(1).unwrap();
    assert_eq!(
        registry.get_or_load(&store, 1, 2).unwrap().unwrap().version(),
        3
    );
}
