//! File-system snapshotting and fingerprint computation.
//!
//! [`FileSystemAccess`] reads point-in-time snapshots of locations; a
//! normalization spec turns snapshots and file collections into
//! hash-friendly fingerprints.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::hashing::{HashCode, Hasher};

/// Which aspects of a file path contribute to its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalizer {
    #[default]
    AbsolutePath,
    /// Only the file name matters; relocating the file does not change the
    /// fingerprint.
    NameOnly,
}

/// Whether directory entries themselves contribute to a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectorySensitivity {
    #[default]
    Default,
    IgnoreDirectories,
}

/// Pair of normalization policies forming a fingerprint spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileNormalizationSpec {
    pub normalizer: Normalizer,
    pub directory_sensitivity: DirectorySensitivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    RegularFile,
    Directory,
    Missing,
}

/// Point-in-time snapshot of one file-system location.
///
/// The hash covers raw content: file bytes for regular files, a digest over
/// sorted child names and hashes for directories.
#[derive(Debug, Clone)]
pub struct FileSystemSnapshot {
    pub path: PathBuf,
    pub kind: SnapshotKind,
    pub hash: HashCode,
}

/// Facade reading snapshots of the file system. Stateless and thread-safe.
#[derive(Debug, Default)]
pub struct FileSystemAccess;

impl FileSystemAccess {
    pub fn new() -> Self {
        Self
    }

    pub fn snapshot(&self, path: &Path) -> Result<FileSystemSnapshot> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(FileSystemSnapshot {
                    path: path.to_path_buf(),
                    kind: SnapshotKind::Missing,
                    hash: missing_marker(),
                });
            }
            Err(error) => {
                return Err(error).with_context(|| format!("stat {}", path.display()));
            }
        };
        let (kind, hash) = if metadata.is_dir() {
            (SnapshotKind::Directory, hash_directory(path)?)
        } else {
            (SnapshotKind::RegularFile, hash_file(path)?)
        };
        debug!(path = %path.display(), ?kind, "snapshotted location");
        Ok(FileSystemSnapshot {
            path: path.to_path_buf(),
            kind,
            hash,
        })
    }
}

/// Fingerprint of a file collection: a collection-level hash plus the
/// per-file entries (normalized path to content hash) it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCollectionFingerprint {
    pub hash: HashCode,
    pub entries: BTreeMap<String, HashCode>,
}

/// The path component a snapshot contributes to an identity.
pub fn normalized_path(spec: FileNormalizationSpec, snapshot: &FileSystemSnapshot) -> String {
    match spec.normalizer {
        Normalizer::AbsolutePath => snapshot.path.to_string_lossy().into_owned(),
        Normalizer::NameOnly => snapshot
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Fingerprint a collection of file roots under the given spec.
///
/// The empty collection has a stable fingerprint.
pub fn fingerprint_collection(
    spec: FileNormalizationSpec,
    files: &[PathBuf],
    file_system_access: &FileSystemAccess,
) -> Result<FileCollectionFingerprint> {
    let mut entries = BTreeMap::new();
    for root in files {
        let snapshot = file_system_access.snapshot(root)?;
        match snapshot.kind {
            SnapshotKind::RegularFile | SnapshotKind::Missing => {
                entries.insert(normalized_path(spec, &snapshot), snapshot.hash);
            }
            SnapshotKind::Directory => {
                if spec.directory_sensitivity == DirectorySensitivity::Default {
                    entries.insert(normalized_path(spec, &snapshot), directory_marker());
                }
                collect_directory_entries(spec, root, &mut entries)?;
            }
        }
    }
    let mut hasher = Hasher::new();
    for (path, hash) in &entries {
        hasher.put_str(path);
        hasher.put_hash(hash);
    }
    Ok(FileCollectionFingerprint {
        hash: hasher.finish(),
        entries,
    })
}

fn collect_directory_entries(
    spec: FileNormalizationSpec,
    dir: &Path,
    entries: &mut BTreeMap<String, HashCode>,
) -> Result<()> {
    for path in sorted_children(dir)? {
        if path.is_dir() {
            if spec.directory_sensitivity == DirectorySensitivity::Default {
                entries.insert(entry_path(spec, &path), directory_marker());
            }
            collect_directory_entries(spec, &path, entries)?;
        } else {
            entries.insert(entry_path(spec, &path), hash_file(&path)?);
        }
    }
    Ok(())
}

fn entry_path(spec: FileNormalizationSpec, path: &Path) -> String {
    match spec.normalizer {
        Normalizer::AbsolutePath => path.to_string_lossy().into_owned(),
        Normalizer::NameOnly => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn hash_file(path: &Path) -> Result<HashCode> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(HashCode::of(&contents))
}

fn hash_directory(dir: &Path) -> Result<HashCode> {
    let mut hasher = Hasher::new();
    hasher.put_str("dir");
    for path in sorted_children(dir)? {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.put_str(&name);
        let child_hash = if path.is_dir() {
            hash_directory(&path)?
        } else {
            hash_file(&path)?
        };
        hasher.put_hash(&child_hash);
    }
    Ok(hasher.finish())
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read directory {}", dir.display()))?;
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

fn directory_marker() -> HashCode {
    HashCode::of(b"directory")
}

fn missing_marker() -> HashCode {
    HashCode::of(b"missing")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_snapshot_follows_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("a.txt");
        fs::write(&file, "one").expect("write");
        let access = FileSystemAccess::new();

        let first = access.snapshot(&file).expect("snapshot");
        assert_eq!(first.kind, SnapshotKind::RegularFile);
        let again = access.snapshot(&file).expect("snapshot");
        assert_eq!(first.hash, again.hash);

        fs::write(&file, "two").expect("write");
        let changed = access.snapshot(&file).expect("snapshot");
        assert_ne!(first.hash, changed.hash);
    }

    #[test]
    fn directory_snapshot_follows_children() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("tree");
        fs::create_dir_all(dir.join("sub")).expect("mkdir");
        fs::write(dir.join("sub").join("a.txt"), "one").expect("write");
        let access = FileSystemAccess::new();

        let first = access.snapshot(&dir).expect("snapshot");
        assert_eq!(first.kind, SnapshotKind::Directory);

        fs::write(dir.join("sub").join("a.txt"), "two").expect("write");
        let changed = access.snapshot(&dir).expect("snapshot");
        assert_ne!(first.hash, changed.hash);
    }

    #[test]
    fn missing_locations_snapshot_without_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let access = FileSystemAccess::new();
        let snapshot = access.snapshot(&temp.path().join("nope")).expect("snapshot");
        assert_eq!(snapshot.kind, SnapshotKind::Missing);
    }

    #[test]
    fn name_only_normalization_ignores_location() {
        let temp = tempfile::tempdir().expect("tempdir");
        let here = temp.path().join("here").join("lib.jar");
        let there = temp.path().join("there").join("lib.jar");
        fs::create_dir_all(here.parent().unwrap()).expect("mkdir");
        fs::create_dir_all(there.parent().unwrap()).expect("mkdir");
        fs::write(&here, "same").expect("write");
        fs::write(&there, "same").expect("write");
        let access = FileSystemAccess::new();
        let spec = FileNormalizationSpec {
            normalizer: Normalizer::NameOnly,
            directory_sensitivity: DirectorySensitivity::Default,
        };

        let a = fingerprint_collection(spec, &[here.clone()], &access).expect("fingerprint");
        let b = fingerprint_collection(spec, &[there.clone()], &access).expect("fingerprint");
        assert_eq!(a.hash, b.hash);

        let absolute = FileNormalizationSpec::default();
        let a = fingerprint_collection(absolute, &[here], &access).expect("fingerprint");
        let b = fingerprint_collection(absolute, &[there], &access).expect("fingerprint");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn empty_collection_fingerprint_is_stable() {
        let access = FileSystemAccess::new();
        let spec = FileNormalizationSpec::default();
        let a = fingerprint_collection(spec, &[], &access).expect("fingerprint");
        let b = fingerprint_collection(spec, &[], &access).expect("fingerprint");
        assert_eq!(a.hash, b.hash);
        assert!(a.entries.is_empty());
    }

    #[test]
    fn ignore_directories_drops_directory_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("tree");
        fs::create_dir_all(dir.join("sub")).expect("mkdir");
        fs::write(dir.join("sub").join("a.txt"), "one").expect("write");
        let access = FileSystemAccess::new();

        let sensitive = fingerprint_collection(
            FileNormalizationSpec::default(),
            std::slice::from_ref(&dir),
            &access,
        )
        .expect("fingerprint");
        let insensitive = fingerprint_collection(
            FileNormalizationSpec {
                normalizer: Normalizer::AbsolutePath,
                directory_sensitivity: DirectorySensitivity::IgnoreDirectories,
            },
            std::slice::from_ref(&dir),
            &access,
        )
        .expect("fingerprint");

        assert_eq!(insensitive.entries.len(), 1);
        assert_eq!(sensitive.entries.len(), 3);
        assert_ne!(sensitive.hash, insensitive.hash);
    }
}
