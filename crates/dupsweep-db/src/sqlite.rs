use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use dupsweep_core::{
    Catalog, CatalogConfig, CatalogSnapshot, ContentDigest, ContentId, ContentRecord, ContentType,
    Disk, DiskId, FsNode, NodeId,
};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Version stamped into `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

/// A catalog database on disk or in memory.
pub struct CatalogDb {
    conn: Connection,
}

impl CatalogDb {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let db = CatalogDb { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        debug!(path = %path.as_ref().display(), "catalog database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = CatalogDb { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> DbResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Older layouts are dropped; the catalog can always be rebuilt by a scan.
    fn migrate_schema(&self) -> DbResult<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != 0 && version < SCHEMA_VERSION {
            debug!(version, "dropping outdated catalog schema");
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS fsrecords;
                 DROP TABLE IF EXISTS disks;
                 DROP TABLE IF EXISTS files;
                 DROP TABLE IF EXISTS type_extensions;
                 DROP TABLE IF EXISTS types;",
            )?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether nothing has been saved yet.
    pub fn is_empty(&self) -> DbResult<bool> {
        let disks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM disks", [], |row| row.get(0))?;
        Ok(disks == 0)
    }

    /// Replace the stored catalog with `catalog`, atomically.
    pub fn save(&mut self, catalog: &Catalog) -> DbResult<()> {
        let snapshot = catalog.snapshot();
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "PRAGMA defer_foreign_keys = ON;
             DELETE FROM fsrecords;
             DELETE FROM disks;
             DELETE FROM files;
             DELETE FROM type_extensions;
             DELETE FROM types;",
        )?;

        {
            let mut insert_type = tx.prepare("INSERT INTO types (name) VALUES (?1)")?;
            let mut insert_extension = tx
                .prepare("INSERT INTO type_extensions (extension, type_name) VALUES (?1, ?2)")?;
            for content_type in &snapshot.content_types {
                insert_type.execute(params![content_type.name.as_str()])?;
                for extension in &content_type.extensions {
                    insert_extension
                        .execute(params![extension.as_str(), content_type.name.as_str()])?;
                }
            }

            let mut insert_file = tx.prepare(
                "INSERT INTO files (id, digest, size, earliest, name, extension, media_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in &snapshot.content {
                insert_file.execute(params![
                    to_key(record.id.0)?,
                    record.digest.as_bytes(),
                    to_key(record.size)?,
                    to_nanos(record.earliest)?,
                    record.name.as_str(),
                    record.extension.as_str(),
                    record.media_type.as_deref(),
                ])?;
            }

            let mut insert_disk = tx.prepare(
                "INSERT INTO disks (id, uuid, capacity, label, root_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for disk in &snapshot.disks {
                insert_disk.execute(params![
                    to_key(disk.id.0)?,
                    disk.uuid.as_str(),
                    to_key(disk.capacity)?,
                    disk.label.as_str(),
                    to_key(disk.root.0)?,
                ])?;
            }

            let mut insert_node = tx.prepare(
                "INSERT INTO fsrecords (id, disk_id, parent_id, name, modified, file_id, content_read) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for node in &snapshot.nodes {
                insert_node.execute(params![
                    to_key(node.id.0)?,
                    to_key(node.disk.0)?,
                    node.parent.map(|p| to_key(p.0)).transpose()?,
                    node.name.as_str(),
                    node.modified.map(to_nanos).transpose()?,
                    node.content.map(|c| to_key(c.0)).transpose()?,
                    node.content_read.map(to_nanos).transpose()?,
                ])?;
            }
        }

        tx.commit()?;
        info!(
            disks = snapshot.disks.len(),
            records = snapshot.content.len(),
            nodes = snapshot.nodes.len(),
            "catalog saved"
        );
        Ok(())
    }

    /// Rebuild the stored catalog and check its integrity.
    pub fn load(&self, config: CatalogConfig) -> DbResult<Catalog> {
        let snapshot = CatalogSnapshot {
            content_types: self.load_types()?,
            disks: self.load_disks()?,
            content: self.load_files()?,
            nodes: self.load_nodes()?,
        };
        Ok(Catalog::restore(snapshot, config)?)
    }

    fn load_types(&self) -> DbResult<Vec<ContentType>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name, e.extension FROM types t \
             LEFT JOIN type_extensions e ON e.type_name = t.name \
             ORDER BY t.name, e.extension",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut types: BTreeMap<String, BTreeSet<CompactString>> = BTreeMap::new();
        for row in rows {
            let (name, extension) = row?;
            let extensions = types.entry(name).or_default();
            if let Some(extension) = extension {
                extensions.insert(extension.into());
            }
        }
        Ok(types
            .into_iter()
            .map(|(name, extensions)| ContentType {
                name: name.into(),
                extensions,
            })
            .collect())
    }

    fn load_disks(&self) -> DbResult<Vec<Disk>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, uuid, capacity, label, root_id FROM disks ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut disks = Vec::new();
        for row in rows {
            let (id, uuid, capacity, label, root) = row?;
            disks.push(Disk {
                id: DiskId(from_key(id)?),
                uuid: uuid.into(),
                capacity: from_key(capacity)?,
                label: label.into(),
                root: NodeId(from_key(root)?),
            });
        }
        Ok(disks)
    }

    fn load_files(&self) -> DbResult<Vec<ContentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, digest, size, earliest, name, extension, media_type FROM files ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, digest, size, earliest, name, extension, media_type) = row?;
            if digest.is_empty() {
                return Err(DbError::corrupt(format!(
                    "content record {id} has an empty digest"
                )));
            }
            records.push(ContentRecord::unlinked(
                ContentId(from_key(id)?),
                ContentDigest::new(digest),
                from_key(size)?,
                from_nanos(earliest),
                name,
                extension,
                media_type.map(CompactString::from),
            ));
        }
        Ok(records)
    }

    fn load_nodes(&self) -> DbResult<Vec<FsNode>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, disk_id, parent_id, name, modified, file_id, content_read \
             FROM fsrecords ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, disk, parent, name, modified, file, content_read) = row?;
            let parent = parent.map(from_key).transpose()?.map(NodeId);
            let mut node = FsNode::unlinked(
                NodeId(from_key(id)?),
                name,
                parent,
                DiskId(from_key(disk)?),
            );
            node.modified = modified.map(from_nanos);
            node.content = file.map(from_key).transpose()?.map(ContentId);
            node.content_read = content_read.map(from_nanos);
            nodes.push(node);
        }
        Ok(nodes)
    }
}

fn to_key(value: u64) -> DbResult<i64> {
    i64::try_from(value)
        .map_err(|_| DbError::corrupt(format!("value {value} exceeds the SQLite integer range")))
}

fn from_key(value: i64) -> DbResult<u64> {
    u64::try_from(value).map_err(|_| DbError::corrupt(format!("negative key or size {value}")))
}

/// Timestamps are stored at full precision so cached digests still match
/// the modification dates a later walk reports.
fn to_nanos(time: DateTime<Utc>) -> DbResult<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| DbError::corrupt(format!("timestamp {time} cannot be stored")))
}

fn from_nanos(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version_is_stamped() {
        let db = CatalogDb::open_in_memory().unwrap();
        let version: i64 = db
            .connection()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(db.is_empty().unwrap());
    }

    #[test]
    fn test_key_conversions() {
        assert_eq!(to_key(7).unwrap(), 7);
        assert!(to_key(u64::MAX).is_err());
        assert!(from_key(-1).is_err());
    }

    #[test]
    fn test_timestamps_keep_nanoseconds() {
        let time = DateTime::from_timestamp(1_622_548_800, 825_515_498).unwrap();
        assert_eq!(from_nanos(to_nanos(time).unwrap()), time);

        let far = DateTime::from_timestamp(i64::from(i32::MAX) * 10, 0).unwrap();
        assert!(to_nanos(far).is_err());
    }
}
