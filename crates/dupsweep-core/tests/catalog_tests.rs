use std::cell::Cell;
use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use dupsweep_core::{
    Catalog, CatalogConfig, CatalogError, ContentDigest, ContentStore, ContentTypes,
};

fn digest(byte: u8) -> ContentDigest {
    ContentDigest::new(vec![byte; 20])
}

fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

#[test]
fn test_intern_is_idempotent_and_keeps_earliest() {
    let mut store = ContentStore::default();
    let a = store
        .intern(digest(1), 100, date(2021, 1, 1), "a", "jpg")
        .unwrap();
    let b = store
        .intern(digest(1), 100, date(2019, 5, 1), "b", "jpg")
        .unwrap();
    let c = store
        .intern(digest(1), 100, date(2022, 1, 1), "c", "jpg")
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(store.len(), 1);
    let record = store.get(a).unwrap();
    assert_eq!(record.earliest, date(2019, 5, 1));
    // First sighting names the record.
    assert_eq!(record.name, "a");
}

#[test]
fn test_intern_size_mismatch_is_integrity_error() {
    let mut store = ContentStore::default();
    store
        .intern(digest(1), 100, date(2021, 1, 1), "a", "")
        .unwrap();
    let err = store
        .intern(digest(1), 101, date(2021, 1, 1), "a", "")
        .unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Integrity {
            recorded_size: 100,
            observed_size: 101,
            ..
        }
    ));
}

#[test]
fn test_delete_subtree_keeps_shared_content() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 1_000, "Main");
    catalog
        .record_file(disk, &["Photos", "a.jpg"], 10, None, || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(disk, &["Photos", "b.jpg"], 20, None, || Ok(digest(2)))
        .unwrap();
    let kept = catalog
        .record_file(disk, &["Backup", "a.jpg"], 10, None, || Ok(digest(1)))
        .unwrap();

    let photos = catalog.lookup(disk, &["Photos"]).unwrap();
    let summary = catalog.delete_subtree(photos).unwrap();

    assert_eq!(summary.nodes_removed, 3);
    assert_eq!(summary.files_removed, 2);
    assert_eq!(summary.bytes_removed, 30);
    assert_eq!(summary.content_removed, 1);

    assert!(catalog.lookup(disk, &["Photos"]).is_none());
    assert!(catalog.content().by_digest(&digest(2)).is_none());
    let shared = catalog.content().by_digest(&digest(1)).unwrap();
    assert_eq!(shared.ref_count(), 1);
    assert_eq!(catalog.content_of(kept.node).unwrap().id, shared.id);
    catalog.check_integrity().unwrap();
}

#[test]
fn test_rescan_reuses_cached_digests() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    let modified = Some(date(2020, 1, 1));
    let calls = Cell::new(0);
    let provider = |byte: u8| -> std::io::Result<ContentDigest> {
        calls.set(calls.get() + 1);
        Ok(digest(byte))
    };

    for _ in 0..3 {
        catalog
            .record_file(disk, &["a.txt"], 5, modified, || provider(1))
            .unwrap();
        catalog
            .record_file(disk, &["dir", "b.txt"], 6, modified, || provider(2))
            .unwrap();
    }
    assert_eq!(calls.get(), 2);

    // A changed modification date forces a fresh digest.
    let outcome = catalog
        .record_file(disk, &["a.txt"], 5, Some(date(2020, 2, 1)), || provider(1))
        .unwrap();
    assert!(outcome.hashed);
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_rehash_cutoff_expires_digests() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    catalog
        .record_file(disk, &["a.txt"], 5, None, || Ok(digest(1)))
        .unwrap();

    let snapshot = catalog.snapshot();
    let config = CatalogConfig::builder()
        .rehash_before(Some(Utc::now() + chrono::Duration::seconds(60)))
        .build()
        .unwrap();
    let mut catalog = Catalog::restore(snapshot, config).unwrap();

    let outcome = catalog
        .record_file(disk, &["a.txt"], 5, None, || Ok(digest(1)))
        .unwrap();
    assert!(outcome.hashed);
}

#[test]
fn test_changed_content_relinks_leaf() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    let first = catalog
        .record_file(disk, &["a.txt"], 5, Some(date(2020, 1, 1)), || Ok(digest(1)))
        .unwrap();
    let second = catalog
        .record_file(disk, &["a.txt"], 7, Some(date(2020, 3, 1)), || Ok(digest(2)))
        .unwrap();

    assert_eq!(first.node, second.node);
    assert_ne!(first.content, second.content);
    assert!(catalog.content().by_digest(&digest(1)).is_none());
    assert_eq!(catalog.content().len(), 1);
    catalog.check_integrity().unwrap();
}

#[test]
fn test_failed_digest_commits_nothing() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    let err = catalog
        .record_file(disk, &["dir", "locked.bin"], 5, None, || {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
        })
        .unwrap_err();

    assert!(!err.is_fatal());
    assert!(catalog.lookup(disk, &["dir"]).is_none());
    assert!(catalog.content().is_empty());
}

#[test]
fn test_kind_change_replaces_subtree() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    catalog
        .record_file(disk, &["thing", "inner.txt"], 5, None, || Ok(digest(1)))
        .unwrap();

    // "thing" is now a file.
    let outcome = catalog
        .record_file(disk, &["thing"], 9, None, || Ok(digest(2)))
        .unwrap();
    assert!(catalog.node(outcome.node).unwrap().is_file());
    assert!(catalog.content().by_digest(&digest(1)).is_none());

    // And back to a directory.
    let dir = catalog.ensure_directory(disk, &["thing"]).unwrap();
    assert!(catalog.node(dir).unwrap().is_dir());
    assert!(catalog.content().is_empty());
    catalog.check_integrity().unwrap();
}

#[test]
fn test_retain_children_prunes_vanished_entries() {
    let mut catalog = Catalog::default();
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    for (name, byte) in [("a", 1), ("b", 2), ("c", 3)] {
        catalog
            .record_file(disk, &["dir", name], 1, None, || Ok(digest(byte)))
            .unwrap();
    }

    let dir = catalog.lookup(disk, &["dir"]).unwrap();
    let keep: HashSet<CompactString> = ["a", "c"].into_iter().map(CompactString::from).collect();
    let summary = catalog.retain_children(dir, &keep).unwrap();

    assert_eq!(summary.files_removed, 1);
    assert!(catalog.lookup(disk, &["dir", "b"]).is_none());
    assert_eq!(catalog.children(dir).unwrap().len(), 2);
}

#[test]
fn test_lazy_orphan_collection() {
    let config = CatalogConfig::builder()
        .eager_orphan_removal(false)
        .build()
        .unwrap();
    let mut catalog = Catalog::new(config, ContentTypes::new());
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    let outcome = catalog
        .record_file(disk, &["a.txt"], 5, None, || Ok(digest(1)))
        .unwrap();

    let summary = catalog.delete_subtree(outcome.node).unwrap();
    assert_eq!(summary.content_removed, 0);
    assert_eq!(catalog.stats().orphan_records, 1);
    catalog.check_integrity().unwrap();

    assert_eq!(catalog.collect_orphans(), 1);
    assert!(catalog.content().is_empty());
}

#[test]
fn test_snapshot_restore_roundtrip() {
    let mut types = ContentTypes::new();
    types.register("image", ["jpg"]).unwrap();
    let mut catalog = Catalog::new(CatalogConfig::default(), types);
    let disk = catalog.register_disk("uuid-1", 0, "Main");
    catalog
        .record_file(disk, &["Photos", "a.jpg"], 10, Some(date(2020, 1, 1)), || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(disk, &["Backup", "a.jpg"], 10, Some(date(2019, 1, 1)), || Ok(digest(1)))
        .unwrap();

    let json = serde_json::to_string(&catalog.snapshot()).unwrap();
    let restored = Catalog::restore(serde_json::from_str(&json).unwrap(), CatalogConfig::default())
        .unwrap();

    let node = restored.lookup(disk, &["Backup", "a.jpg"]).unwrap();
    assert_eq!(restored.path_of(node).unwrap(), "Backup/a.jpg");
    let record = restored.content_of(node).unwrap();
    assert_eq!(record.ref_count(), 2);
    assert_eq!(record.earliest, date(2019, 1, 1));
    assert_eq!(record.media_type.as_deref(), Some("image"));
    assert_eq!(restored.content().types().len(), 1);
    assert_eq!(restored.content_groups().len(), 1);
}

#[test]
fn test_disk_registration_by_uuid() {
    let mut catalog = Catalog::default();
    let a = catalog.register_disk("uuid-1", 500, "One");
    let b = catalog.register_disk("uuid-2", 500, "Two");
    assert_ne!(a, b);
    assert_eq!(catalog.register_disk("uuid-1", 999, "One"), a);
    assert_eq!(catalog.disk(a).unwrap().capacity, 500);
    assert_eq!(catalog.disks().count(), 2);
}

#[test]
fn test_remove_disk_releases_content() {
    let mut catalog = Catalog::default();
    let a = catalog.register_disk("uuid-1", 0, "One");
    let b = catalog.register_disk("uuid-2", 0, "Two");
    catalog
        .record_file(a, &["Photos", "a.jpg"], 10, None, || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(b, &["Old", "Photos", "a.jpg"], 10, None, || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(b, &["only-here.txt"], 4, None, || Ok(digest(2)))
        .unwrap();

    let summary = catalog.remove_disk(b).unwrap();
    assert_eq!(summary.files_removed, 2);
    // Old, Old/Photos, both files and the disk root.
    assert_eq!(summary.nodes_removed, 5);
    assert_eq!(summary.content_removed, 1);

    assert!(catalog.disk(b).is_none());
    assert_eq!(catalog.disks().count(), 1);
    assert_eq!(catalog.content().len(), 1);
    let kept = catalog.lookup(a, &["Photos", "a.jpg"]).unwrap();
    assert_eq!(catalog.content_of(kept).unwrap().ref_count(), 1);
    catalog.check_integrity().unwrap();

    // The UUID is free again.
    let again = catalog.register_disk("uuid-2", 0, "Two");
    assert_ne!(again, b);
    assert!(matches!(
        catalog.remove_disk(b),
        Err(CatalogError::UnknownDisk { .. })
    ));
}

#[test]
fn test_directory_groups_match_file_sets() {
    let mut catalog = Catalog::default();
    let a = catalog.register_disk("uuid-1", 0, "One");
    let b = catalog.register_disk("uuid-2", 0, "Two");
    for (disk, dir) in [(a, "Trip"), (b, "Trip copy")] {
        catalog
            .record_file(disk, &[dir, "1.jpg"], 100, None, || Ok(digest(1)))
            .unwrap();
        catalog
            .record_file(disk, &[dir, "2.jpg"], 50, None, || Ok(digest(2)))
            .unwrap();
    }
    // Renamed files still match; an extra file does not.
    catalog
        .record_file(a, &["Renamed", "x.jpg"], 100, None, || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(a, &["Renamed", "y.jpg"], 50, None, || Ok(digest(2)))
        .unwrap();
    catalog
        .record_file(a, &["Superset", "1.jpg"], 100, None, || Ok(digest(1)))
        .unwrap();
    catalog
        .record_file(a, &["Superset", "2.jpg"], 50, None, || Ok(digest(2)))
        .unwrap();
    catalog
        .record_file(a, &["Superset", "3.jpg"], 7, None, || Ok(digest(3)))
        .unwrap();

    let groups = catalog.directory_groups();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.size, 150);
    assert_eq!(group.wasted_bytes(), 300);
    let paths: Vec<&str> = group
        .directories
        .iter()
        .map(|d| catalog.path_of(*d).unwrap())
        .collect();
    assert_eq!(paths, vec!["Renamed", "Trip", "Trip copy"]);
}
