//! Content store: one logical file record per content digest.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::node::{ContentDigest, ContentId};

/// Canonical media classification for a set of extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    /// Unique type name.
    pub name: CompactString,
    /// Lowercase extensions, unique across all types.
    pub extensions: BTreeSet<CompactString>,
}

/// Registry of content types, loaded once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTypes {
    types: BTreeMap<CompactString, ContentType>,
    #[serde(skip)]
    by_extension: HashMap<CompactString, CompactString>,
}

impl ContentTypes {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Names and extensions must be unique.
    pub fn register<I, S>(&mut self, name: impl Into<CompactString>, extensions: I) -> CatalogResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(CatalogError::DuplicateContentType { name });
        }

        let extensions: BTreeSet<CompactString> = extensions
            .into_iter()
            .map(|ext| CompactString::from(ext.as_ref().trim_start_matches('.').to_lowercase()))
            .collect();

        for ext in &extensions {
            if let Some(first) = self.by_extension.get(ext) {
                return Err(CatalogError::DuplicateExtension {
                    extension: ext.clone(),
                    first: first.clone(),
                    second: name,
                });
            }
        }

        for ext in &extensions {
            self.by_extension.insert(ext.clone(), name.clone());
        }
        self.types.insert(
            name.clone(),
            ContentType {
                name,
                extensions,
            },
        );
        Ok(())
    }

    /// Find the type claiming an extension (case-insensitive).
    pub fn for_extension(&self, extension: &str) -> Option<&ContentType> {
        let name = self.by_extension.get(extension.to_lowercase().as_str())?;
        self.types.get(name)
    }

    /// Find a type by name.
    pub fn get(&self, name: &str) -> Option<&ContentType> {
        self.types.get(name)
    }

    /// Iterate over registered types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentType> {
        self.types.values()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A logical file: all tree leaves with this digest share it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Catalog-local key.
    pub id: ContentId,
    /// Identity of the content.
    pub digest: ContentDigest,
    /// Byte size.
    pub size: u64,
    /// Earliest observed date among referencing nodes. Only ever lowered.
    pub earliest: DateTime<Utc>,
    /// Canonical display name (without extension).
    pub name: CompactString,
    /// Canonical extension.
    pub extension: CompactString,
    /// Name of the content type, if any. A name with no registered type is
    /// treated as unclassified.
    pub media_type: Option<CompactString>,
    /// Number of tree leaves linking to this record.
    #[serde(skip)]
    pub(crate) refs: u64,
}

impl ContentRecord {
    /// A record as loaded from storage. Reference counts start at zero and
    /// are recomputed on restore.
    pub fn unlinked(
        id: ContentId,
        digest: ContentDigest,
        size: u64,
        earliest: DateTime<Utc>,
        name: impl Into<CompactString>,
        extension: impl Into<CompactString>,
        media_type: Option<CompactString>,
    ) -> Self {
        Self {
            id,
            digest,
            size,
            earliest,
            name: name.into(),
            extension: extension.into(),
            media_type,
            refs: 0,
        }
    }

    /// Number of tree leaves currently linking to this record.
    pub fn ref_count(&self) -> u64 {
        self.refs
    }
}

/// Map from content digest to logical file record.
#[derive(Debug, Clone, Default)]
pub struct ContentStore {
    records: HashMap<ContentId, ContentRecord>,
    by_digest: HashMap<ContentDigest, ContentId>,
    next_id: u64,
    types: ContentTypes,
}

impl ContentStore {
    /// Create an empty store with the given classification table.
    pub fn new(types: ContentTypes) -> Self {
        Self {
            types,
            ..Self::default()
        }
    }

    /// Return the record for `digest`, creating it on first sight.
    ///
    /// An existing record has its earliest date lowered to `observed` when
    /// older. A size mismatch on an existing digest is an integrity error.
    pub fn intern(
        &mut self,
        digest: ContentDigest,
        size: u64,
        observed: DateTime<Utc>,
        name: &str,
        extension: &str,
    ) -> CatalogResult<ContentId> {
        if let Some(&id) = self.by_digest.get(&digest) {
            let record = self
                .records
                .get_mut(&id)
                .ok_or_else(|| CatalogError::invariant(format!("digest index points at missing record {id:?}")))?;
            if record.size != size {
                return Err(CatalogError::Integrity {
                    digest,
                    recorded_size: record.size,
                    observed_size: size,
                });
            }
            if observed < record.earliest {
                record.earliest = observed;
            }
            return Ok(id);
        }

        let id = ContentId(self.next_id);
        self.next_id += 1;
        let media_type = self.types.for_extension(extension).map(|t| t.name.clone());
        self.by_digest.insert(digest.clone(), id);
        self.records.insert(
            id,
            ContentRecord {
                id,
                digest,
                size,
                earliest: observed,
                name: name.into(),
                extension: extension.into(),
                media_type,
                refs: 0,
            },
        );
        Ok(id)
    }

    /// Content type of a record, or `None` when unclassified.
    pub fn classify(&self, record: &ContentRecord) -> Option<&ContentType> {
        record
            .media_type
            .as_deref()
            .and_then(|name| self.types.get(name))
    }

    /// Get a record by key.
    pub fn get(&self, id: ContentId) -> Option<&ContentRecord> {
        self.records.get(&id)
    }

    /// Get a record by digest.
    pub fn by_digest(&self, digest: &ContentDigest) -> Option<&ContentRecord> {
        self.by_digest.get(digest).and_then(|id| self.records.get(id))
    }

    /// Iterate over all records.
    pub fn iter(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Classification table in use.
    pub fn types(&self) -> &ContentTypes {
        &self.types
    }

    pub(crate) fn acquire(&mut self, id: ContentId) -> CatalogResult<()> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| CatalogError::invariant(format!("link to missing content {id:?}")))?;
        record.refs += 1;
        Ok(())
    }

    /// Drop one reference. Returns true when the record became unreferenced.
    pub(crate) fn release(&mut self, id: ContentId) -> CatalogResult<bool> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| CatalogError::invariant(format!("release of missing content {id:?}")))?;
        if record.refs == 0 {
            return Err(CatalogError::invariant(format!(
                "reference count underflow on content {}",
                record.digest
            )));
        }
        record.refs -= 1;
        Ok(record.refs == 0)
    }

    /// Remove an unreferenced record.
    pub(crate) fn remove(&mut self, id: ContentId) -> Option<ContentRecord> {
        let record = self.records.remove(&id)?;
        self.by_digest.remove(&record.digest);
        Some(record)
    }

    /// Keys of records nothing links to.
    pub fn orphans(&self) -> Vec<ContentId> {
        let mut ids: Vec<ContentId> = self
            .records
            .values()
            .filter(|r| r.refs == 0)
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    /// Re-insert a record from a snapshot, keeping its key.
    pub(crate) fn restore(&mut self, mut record: ContentRecord) -> CatalogResult<()> {
        if self.by_digest.contains_key(&record.digest) {
            return Err(CatalogError::invariant(format!(
                "digest {} appears twice in snapshot",
                record.digest
            )));
        }
        record.refs = 0;
        self.next_id = self.next_id.max(record.id.0 + 1);
        self.by_digest.insert(record.digest.clone(), record.id);
        self.records.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn image_types() -> ContentTypes {
        let mut types = ContentTypes::new();
        types.register("image", ["jpg", "PNG"]).unwrap();
        types.register("text", [".txt"]).unwrap();
        types
    }

    #[test]
    fn test_register_rejects_shared_extension() {
        let mut types = image_types();
        let err = types.register("photo", ["jpg"]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateExtension { .. }));

        let err = types.register("image", ["gif"]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateContentType { .. }));
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        let types = image_types();
        assert_eq!(types.for_extension("JPG").unwrap().name, "image");
        assert_eq!(types.for_extension("png").unwrap().name, "image");
        assert_eq!(types.for_extension("txt").unwrap().name, "text");
        assert!(types.for_extension("mp4").is_none());
    }

    #[test]
    fn test_intern_classifies_on_creation() {
        let mut store = ContentStore::new(image_types());
        let id = store
            .intern(ContentDigest::new(vec![1; 20]), 10, date(2020), "photo", "jpg")
            .unwrap();
        let record = store.get(id).unwrap();
        assert_eq!(store.classify(record).unwrap().name, "image");

        let id = store
            .intern(ContentDigest::new(vec![2; 20]), 10, date(2020), "movie", "mp4")
            .unwrap();
        assert!(store.classify(store.get(id).unwrap()).is_none());
    }

    #[test]
    fn test_dangling_media_type_is_unclassified() {
        let mut store = ContentStore::new(ContentTypes::new());
        let id = store
            .intern(ContentDigest::new(vec![3; 20]), 1, date(2020), "a", "jpg")
            .unwrap();
        let mut record = store.get(id).unwrap().clone();
        record.media_type = Some("vanished".into());
        assert!(store.classify(&record).is_none());
    }

    #[test]
    fn test_release_reports_last_reference() {
        let mut store = ContentStore::default();
        let id = store
            .intern(ContentDigest::new(vec![4; 20]), 1, date(2020), "a", "")
            .unwrap();
        store.acquire(id).unwrap();
        store.acquire(id).unwrap();
        assert!(!store.release(id).unwrap());
        assert!(store.release(id).unwrap());
        assert!(store.release(id).is_err());
        assert_eq!(store.orphans(), vec![id]);
    }
}
