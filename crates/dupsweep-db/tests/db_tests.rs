use chrono::{TimeZone, Utc};
use dupsweep_core::{Catalog, CatalogConfig, ContentDigest, ContentTypes};
use dupsweep_db::{CatalogDb, DbError};

fn digest(byte: u8) -> ContentDigest {
    ContentDigest::new(vec![byte; 32])
}

fn sample_catalog() -> Catalog {
    let mut types = ContentTypes::new();
    types.register("image", ["jpg", "png"]).unwrap();
    let mut catalog = Catalog::new(CatalogConfig::default(), types);

    let modified = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
    let a = catalog.register_disk("uuid-a", 1 << 40, "Backup A");
    let b = catalog.register_disk("uuid-b", 1 << 39, "Backup B");
    catalog
        .record_file(a, &["Photos", "2021", "beach.jpg"], 100, Some(modified), || {
            Ok(digest(1))
        })
        .unwrap();
    catalog
        .record_file(b, &["Old", "Photos", "beach.jpg"], 100, Some(modified), || {
            Ok(digest(1))
        })
        .unwrap();
    catalog
        .record_file(b, &["notes.txt"], 7, None, || Ok(digest(2)))
        .unwrap();
    catalog
}

#[test]
fn test_save_and_load_roundtrip() {
    let catalog = sample_catalog();
    let mut db = CatalogDb::open_in_memory().unwrap();
    db.save(&catalog).unwrap();
    assert!(!db.is_empty().unwrap());

    let loaded = db.load(CatalogConfig::default()).unwrap();
    assert_eq!(loaded.stats(), catalog.stats());
    assert_eq!(loaded.content().types().len(), 1);

    let a = loaded.disks().find(|d| d.uuid == "uuid-a").unwrap().id;
    let beach = loaded
        .lookup(a, &["Photos", "2021", "beach.jpg"])
        .unwrap();
    let record = loaded.content_of(beach).unwrap();
    assert_eq!(record.digest, digest(1));
    assert_eq!(record.ref_count(), 2);
    assert_eq!(record.media_type.as_deref(), Some("image"));
    assert_eq!(
        loaded.node(beach).unwrap().modified,
        Some(Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap())
    );
}

#[test]
fn test_save_replaces_previous_image() {
    let mut catalog = sample_catalog();
    let mut db = CatalogDb::open_in_memory().unwrap();
    db.save(&catalog).unwrap();

    let b = catalog.disks().find(|d| d.uuid == "uuid-b").unwrap().id;
    let old = catalog.lookup(b, &["Old"]).unwrap();
    catalog.delete_subtree(old).unwrap();
    db.save(&catalog).unwrap();

    let loaded = db.load(CatalogConfig::default()).unwrap();
    assert!(loaded.lookup(b, &["Old"]).is_none());
    assert_eq!(loaded.stats().files, 2);
}

#[test]
fn test_parent_delete_cascades_in_sql() {
    let catalog = sample_catalog();
    let mut db = CatalogDb::open_in_memory().unwrap();
    db.save(&catalog).unwrap();

    let conn = db.connection();
    let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap() };
    let files_before = count("SELECT COUNT(*) FROM files");

    conn.execute("DELETE FROM fsrecords WHERE name = 'Old'", [])
        .unwrap();

    assert_eq!(
        count("SELECT COUNT(*) FROM fsrecords WHERE name IN ('Photos', 'beach.jpg')"),
        2
    );
    // Content rows have their own lifecycle.
    assert_eq!(count("SELECT COUNT(*) FROM files"), files_before);
}

#[test]
fn test_digest_is_unique() {
    let catalog = sample_catalog();
    let mut db = CatalogDb::open_in_memory().unwrap();
    db.save(&catalog).unwrap();

    let err = db
        .connection()
        .execute(
            "INSERT INTO files (id, digest, size, earliest, name, extension) \
             SELECT 99, digest, size, earliest, name, extension FROM files LIMIT 1",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("UNIQUE"));
}

#[test]
fn test_corrupt_rows_are_rejected() {
    let catalog = sample_catalog();
    let mut db = CatalogDb::open_in_memory().unwrap();
    db.save(&catalog).unwrap();

    db.connection()
        .execute("UPDATE files SET size = -5", [])
        .unwrap();
    let err = db.load(CatalogConfig::default()).unwrap_err();
    assert!(matches!(err, DbError::Corrupt { .. }));
}

#[test]
fn test_file_database_persists() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("catalog.db");

    {
        let mut db = CatalogDb::open(&path).unwrap();
        db.save(&sample_catalog()).unwrap();
    }

    let db = CatalogDb::open(&path).unwrap();
    let loaded = db.load(CatalogConfig::default()).unwrap();
    assert_eq!(loaded.stats().disks, 2);
    loaded.check_integrity().unwrap();
}
