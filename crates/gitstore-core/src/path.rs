//! Path normalization and tree traversal/rebuild primitives.
//!
//! `rebuild_tree` is the heart of the store: every write, remove, batch, sync
//! and transaction commit funnels through it. Sibling subtrees untouched by a
//! given write/remove set keep their original OID — no rehashing, no
//! unnecessary object-store churn.

use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::fs::PermissionsExt;
use std::path::Path as StdPath;

use bstr::ByteSlice;
use gitstore_hash::ObjectId;
use gitstore_object::{FileMode, Object, Tree, TreeEntry};
use gitstore_odb::ObjectDatabase;

use crate::error::StoreError;

/// Normalize a caller-supplied path: backslashes become slashes, leading and
/// trailing slashes are stripped, `.` segments are dropped, `..` segments and
/// any resulting empty segment are rejected.
pub fn normalize_path(p: &str) -> Result<String, StoreError> {
    let translated: String = p.chars().map(|c| if c == '\\' { '/' } else { c }).collect();
    let trimmed = translated.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath("empty path".into()));
    }

    let mut segments = Vec::new();
    for seg in trimmed.split('/') {
        if seg.is_empty() {
            return Err(StoreError::InvalidPath(format!(
                "'{p}': contains an empty path segment"
            )));
        }
        if seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(StoreError::InvalidPath(format!(
                "'{p}': '..' is not allowed"
            )));
        }
        segments.push(seg);
    }

    if segments.is_empty() {
        return Err(StoreError::InvalidPath("empty path".into()));
    }
    Ok(segments.join("/"))
}

/// Determine the tree-entry mode for a file on disk: `EXECUTABLE` if the
/// owner-exec bit is set, else `REGULAR`. Symlinks report `SYMLINK`.
/// Directories are rejected with `IsADirectory`.
pub fn mode_from_disk(path: &StdPath) -> Result<FileMode, StoreError> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(FileMode::Symlink);
    }
    if meta.is_dir() {
        return Err(StoreError::IsADirectory(path.display().to_string()));
    }
    let mode = meta.permissions().mode();
    if mode & 0o100 != 0 {
        Ok(FileMode::Executable)
    } else {
        Ok(FileMode::Regular)
    }
}

/// Source for a blob being staged into a write.
#[derive(Debug, Clone)]
pub enum WriteData {
    /// Raw content; hashed and stored on rebuild.
    Bytes(Vec<u8>),
    /// Content already present in the object store.
    Oid(ObjectId),
}

/// A single staged write, normalized path already stripped of its key.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    pub data: WriteData,
    pub mode: Option<FileMode>,
}

impl WriteEntry {
    pub fn bytes(data: Vec<u8>, mode: Option<FileMode>) -> Self {
        Self {
            data: WriteData::Bytes(data),
            mode,
        }
    }

    pub fn oid(oid: ObjectId, mode: Option<FileMode>) -> Self {
        Self {
            data: WriteData::Oid(oid),
            mode,
        }
    }
}

/// Read a tree object, erroring with `NotADirectory` if the OID names
/// something else.
pub fn read_tree(odb: &ObjectDatabase, oid: &ObjectId) -> Result<Tree, StoreError> {
    match odb.read(oid)? {
        Some(Object::Tree(tree)) => Ok(tree),
        Some(_) => Err(StoreError::NotADirectory(oid.to_string())),
        None => Err(StoreError::NotFound(oid.to_string())),
    }
}

fn partition_by_first_segment<V>(
    items: BTreeMap<String, V>,
) -> (BTreeMap<String, V>, BTreeMap<String, BTreeMap<String, V>>) {
    let mut leaf = BTreeMap::new();
    let mut nested: BTreeMap<String, BTreeMap<String, V>> = BTreeMap::new();
    for (path, value) in items {
        match path.split_once('/') {
            Some((first, rest)) => {
                nested
                    .entry(first.to_string())
                    .or_default()
                    .insert(rest.to_string(), value);
            }
            None => {
                leaf.insert(path, value);
            }
        }
    }
    (leaf, nested)
}

fn partition_removes(
    items: BTreeSet<String>,
) -> (BTreeSet<String>, BTreeMap<String, BTreeSet<String>>) {
    let mut leaf = BTreeSet::new();
    let mut nested: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for path in items {
        match path.split_once('/') {
            Some((first, rest)) => {
                nested.entry(first.to_string()).or_default().insert(rest.to_string());
            }
            None => {
                leaf.insert(path);
            }
        }
    }
    (leaf, nested)
}

/// Rebuild a tree from a base tree plus a set of writes and removes,
/// returning the new tree's OID. Structural sharing: subtrees untouched by
/// any path in `writes` or `removes` are referenced by their original OID.
pub fn rebuild_tree(
    odb: &ObjectDatabase,
    base_tree: Option<ObjectId>,
    writes: BTreeMap<String, WriteEntry>,
    removes: BTreeSet<String>,
) -> Result<ObjectId, StoreError> {
    let base_entries = match base_tree {
        Some(oid) => read_tree(odb, &oid)?.entries,
        None => Vec::new(),
    };
    let mut by_name: BTreeMap<String, TreeEntry> = base_entries
        .into_iter()
        .map(|e| (e.name.to_str_lossy().into_owned(), e))
        .collect();

    let (leaf_writes, sub_writes) = partition_by_first_segment(writes);
    let (leaf_removes, sub_removes) = partition_removes(removes);

    for name in leaf_removes {
        by_name.remove(&name);
    }

    for (name, entry) in leaf_writes {
        let oid = match entry.data {
            WriteData::Bytes(bytes) => odb.write_raw(gitstore_object::ObjectType::Blob, &bytes)?,
            WriteData::Oid(oid) => oid,
        };
        let mode = entry.mode.unwrap_or(FileMode::Regular);
        by_name.insert(
            name.clone(),
            TreeEntry {
                mode,
                name: name.into(),
                oid,
            },
        );
    }

    let mut first_segments: BTreeSet<String> = sub_writes.keys().cloned().collect();
    first_segments.extend(sub_removes.keys().cloned());

    let mut sub_writes = sub_writes;
    let mut sub_removes = sub_removes;

    for segment in first_segments {
        let existing_subtree_oid = match by_name.get(&segment) {
            Some(entry) if entry.mode.is_tree() => Some(entry.oid),
            _ => None,
        };

        let nested_writes = sub_writes.remove(&segment).unwrap_or_default();
        let nested_removes = sub_removes.remove(&segment).unwrap_or_default();

        let new_subtree_oid =
            rebuild_tree(odb, existing_subtree_oid, nested_writes, nested_removes)?;
        let new_subtree = read_tree(odb, &new_subtree_oid)?;

        if new_subtree.entries.is_empty() {
            by_name.remove(&segment);
        } else {
            by_name.insert(
                segment.clone(),
                TreeEntry {
                    mode: FileMode::Tree,
                    name: segment.into(),
                    oid: new_subtree_oid,
                },
            );
        }
    }

    let mut entries: Vec<TreeEntry> = by_name.into_values().collect();
    entries.sort_by(TreeEntry::cmp_entries);
    odb.write(&Object::Tree(Tree { entries }))
        .map_err(StoreError::from)
}

/// Look up the entry at `path` within `tree_oid`, without requiring it to
/// exist. Returns `NotADirectory` if a non-final segment names a blob.
pub fn entry_at_path(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    path: &str,
) -> Result<Option<(ObjectId, FileMode)>, StoreError> {
    if path.is_empty() {
        return Ok(Some((tree_oid, FileMode::Tree)));
    }

    let segments: Vec<&str> = path.split('/').collect();
    let mut current = tree_oid;

    for (i, segment) in segments.iter().enumerate() {
        let tree = read_tree(odb, &current)?;
        let found = tree.entries.iter().find(|e| e.name == *segment);
        match found {
            None => return Ok(None),
            Some(entry) => {
                if i == segments.len() - 1 {
                    return Ok(Some((entry.oid, entry.mode)));
                }
                if !entry.mode.is_tree() {
                    return Err(StoreError::NotADirectory(
                        segments[..=i].join("/"),
                    ));
                }
                current = entry.oid;
            }
        }
    }
    unreachable!("path is non-empty so the loop always returns")
}

/// Like `entry_at_path` but fails with `NotFound` if the path is absent.
pub fn walk_to(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    path: &str,
) -> Result<(ObjectId, FileMode), StoreError> {
    entry_at_path(odb, tree_oid, path)?.ok_or_else(|| StoreError::NotFound(path.to_string()))
}

/// List the immediate children of `path` (root if `None`). Fails with
/// `NotADirectory` if `path` names a blob.
pub fn list_entries_at_path(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    path: Option<&str>,
) -> Result<Vec<TreeEntry>, StoreError> {
    let target = match path {
        None => tree_oid,
        Some(p) if p.is_empty() => tree_oid,
        Some(p) => {
            let (oid, mode) = walk_to(odb, tree_oid, p)?;
            if !mode.is_tree() {
                return Err(StoreError::NotADirectory(p.to_string()));
            }
            oid
        }
    };
    Ok(read_tree(odb, &target)?.entries)
}

/// One level of a pre-order tree walk: the directory's own path, its
/// immediate subdirectory entries, and its immediate file entries.
pub struct WalkLevel {
    pub dirpath: String,
    pub subdirs: Vec<TreeEntry>,
    pub files: Vec<TreeEntry>,
}

/// Pre-order walk of a tree: directories are emitted before their contents,
/// deterministic by sorted entry name.
pub fn walk_tree(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    prefix: &str,
) -> Result<Vec<WalkLevel>, StoreError> {
    let mut out = Vec::new();
    walk_tree_inner(odb, tree_oid, prefix, &mut out)?;
    Ok(out)
}

fn walk_tree_inner(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    prefix: &str,
    out: &mut Vec<WalkLevel>,
) -> Result<(), StoreError> {
    let entries = read_tree(odb, &tree_oid)?.entries;
    let mut subdirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries {
        if entry.mode.is_tree() {
            subdirs.push(entry);
        } else {
            files.push(entry);
        }
    }

    out.push(WalkLevel {
        dirpath: prefix.to_string(),
        subdirs: subdirs.clone(),
        files,
    });

    for subdir in subdirs {
        let child_prefix = if prefix.is_empty() {
            subdir.name.to_str_lossy().into_owned()
        } else {
            format!("{prefix}/{}", subdir.name)
        };
        walk_tree_inner(odb, subdir.oid, &child_prefix, out)?;
    }
    Ok(())
}
