//! JWalk-based volume walker.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use jwalk::{Parallelism, WalkDir};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::IngestConfig;
use crate::error::{ScanError, ScanWarning, WarningKind};

/// One entry of a volume, relative to its root.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path segments below the root.
    pub segments: Vec<CompactString>,
    /// Absolute path on the host.
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Everything a walk saw.
#[derive(Debug, Default)]
pub struct Walk {
    /// Entries with parents before their children.
    pub entries: Vec<WalkEntry>,
    /// Child names per directory (by segments), the root included.
    pub listings: HashMap<Vec<CompactString>, HashSet<CompactString>>,
    pub warnings: Vec<ScanWarning>,
    /// Whether the walk ran to completion.
    pub complete: bool,
}

/// Walk the volume root described by `config`.
pub fn walk(config: &IngestConfig, cancel: &CancellationToken) -> Result<Walk, ScanError> {
    let root = config
        .root
        .canonicalize()
        .map_err(|e| ScanError::io(&config.root, e))?;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory { path: root });
    }
    // An unreadable root would look like an empty volume.
    std::fs::read_dir(&root).map_err(|e| ScanError::io(&root, e))?;

    let parallelism = match config.threads {
        0 => Parallelism::RayonDefaultPool {
            busy_timeout: std::time::Duration::from_millis(100),
        },
        n => Parallelism::RayonNewPool(n),
    };
    let walker = WalkDir::new(&root)
        .parallelism(parallelism)
        .sort(true)
        .skip_hidden(!config.include_hidden)
        .follow_links(config.follow_symlinks)
        .min_depth(1);

    let mut walk = Walk::default();
    walk.listings.insert(Vec::new(), HashSet::new());
    let mut excluded: HashSet<PathBuf> = HashSet::new();

    for entry_result in walker {
        if cancel.is_cancelled() {
            debug!(root = %root.display(), "walk cancelled");
            return Ok(walk);
        }

        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                walk.warnings
                    .push(ScanWarning::new(path, err.to_string(), WarningKind::ReadError));
                continue;
            }
        };

        let path = entry.path();
        if path.parent().is_some_and(|p| excluded.contains(p)) {
            excluded.insert(path);
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        let file_type = entry.file_type();
        if config.should_ignore(&file_name) || !(file_type.is_dir() || file_type.is_file()) {
            excluded.insert(path);
            continue;
        }

        let Some(segments) = relative_segments(&root, &path) else {
            walk.warnings.push(ScanWarning::new(
                &path,
                "name is not valid UTF-8",
                WarningKind::InvalidName,
            ));
            excluded.insert(path);
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                walk.warnings
                    .push(ScanWarning::new(&path, err.to_string(), WarningKind::MetadataError));
                excluded.insert(path);
                continue;
            }
        };

        let (name, parent) = match segments.split_last() {
            Some((name, parent)) => (name.clone(), parent.to_vec()),
            None => continue,
        };
        walk.listings.entry(parent).or_default().insert(name);

        let is_dir = file_type.is_dir();
        if is_dir {
            match &entry.read_children_error {
                // No listing: what the catalog holds below it must survive.
                Some(err) => walk.warnings.push(ScanWarning::new(
                    &path,
                    err.to_string(),
                    WarningKind::ReadError,
                )),
                None => {
                    walk.listings.entry(segments.clone()).or_default();
                }
            }
        }
        walk.entries.push(WalkEntry {
            segments,
            path,
            is_dir,
            size: if is_dir { 0 } else { metadata.len() },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    walk.complete = true;
    Ok(walk)
}

fn relative_segments(root: &Path, path: &Path) -> Option<Vec<CompactString>> {
    path.strip_prefix(root)
        .ok()?
        .components()
        .map(|c| match c {
            Component::Normal(name) => name.to_str().map(CompactString::from),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("dir1")).unwrap();
        fs::create_dir(root.join("dir1/nested")).unwrap();
        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/a.txt"), "abc").unwrap();
        fs::write(root.join("dir1/nested/deep.txt"), "deep").unwrap();
        fs::create_dir(root.join(".Trashes")).unwrap();
        fs::write(root.join(".Trashes/junk"), "junk").unwrap();

        temp
    }

    #[test]
    fn test_parents_come_first() {
        let temp = create_test_tree();
        let walk = walk(&IngestConfig::new(temp.path()), &CancellationToken::new()).unwrap();

        assert!(walk.complete);
        let position = |p: &str| {
            walk.entries
                .iter()
                .position(|e| e.segments.join("/") == p)
                .unwrap()
        };
        assert!(position("dir1") < position("dir1/nested"));
        assert!(position("dir1/nested") < position("dir1/nested/deep.txt"));

        let deep = &walk.entries[position("dir1/nested/deep.txt")];
        assert_eq!(deep.size, 4);
        assert!(deep.modified.is_some());
    }

    #[test]
    fn test_ignored_names_skip_subtree() {
        let temp = create_test_tree();
        let config = IngestConfig::builder()
            .root(temp.path())
            .ignore_names(vec![".Trashes".to_string()])
            .build()
            .unwrap();
        let walk = walk(&config, &CancellationToken::new()).unwrap();

        assert!(walk.entries.iter().all(|e| e.segments[0] != ".Trashes"));
        let root_listing = &walk.listings[&Vec::<CompactString>::new()];
        assert!(root_listing.contains("dir1"));
        assert!(!root_listing.contains(".Trashes"));
    }

    #[test]
    fn test_cancelled_walk_is_incomplete() {
        let temp = create_test_tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let walk = walk(&IngestConfig::new(temp.path()), &cancel).unwrap();
        assert!(!walk.complete);
        assert!(walk.entries.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_not_listed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = create_test_tree();
        let locked = temp.path().join("dir1/nested");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Permissions are not enforced for this user.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let walk = walk(&IngestConfig::new(temp.path()), &CancellationToken::new()).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(walk.complete);
        let dir1 = vec![CompactString::from("dir1")];
        let nested = vec![CompactString::from("dir1"), CompactString::from("nested")];
        assert!(walk.listings[&dir1].contains("nested"));
        assert!(!walk.listings.contains_key(&nested));
        assert!(walk.warnings.iter().any(|w| {
            w.kind == WarningKind::ReadError && w.path.ends_with("dir1/nested")
        }));
    }

    #[test]
    fn test_file_root_rejected() {
        let temp = create_test_tree();
        let err = walk(
            &IngestConfig::new(temp.path().join("file1.txt")),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory { .. }));
    }
}
