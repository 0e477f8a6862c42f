//! Immutable snapshot handle: the read/write surface callers interact with.
//!
//! Every write funnels through [`FS::commit_changes`], the single choke
//! point that rebuilds the tree, classifies the change, creates a commit,
//! and advances the bound ref under a compare-and-swap.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bstr::ByteSlice;
use gitstore_hash::ObjectId;
use gitstore_object::{Commit, FileMode, Object, Tag, TreeEntry};
use gitstore_ref::{RefName, RefStore, RefTransaction, Reference};

use crate::changeset::{self, ChangeReport};
use crate::error::StoreError;
use crate::glob;
use crate::path::{self, WalkLevel, WriteData, WriteEntry};
use crate::GitStore;

/// Maximum number of annotated-tag hops followed when resolving a tag ref to
/// the commit it ultimately names.
const MAX_TAG_PEEL_DEPTH: usize = 50;

/// An immutable view of `(commit, tree)`, optionally bound to a branch so
/// that writes can advance it.
#[derive(Clone)]
pub struct FS {
    store: Arc<GitStore>,
    commit_oid: ObjectId,
    tree_oid: ObjectId,
    ref_name: Option<String>,
    writable: bool,
    /// Set on the FS returned by a write; `None` for freshly-opened snapshots.
    pub report: Option<ChangeReport>,
}

impl std::fmt::Debug for FS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FS")
            .field("commit_oid", &self.commit_oid)
            .field("tree_oid", &self.tree_oid)
            .field("ref_name", &self.ref_name)
            .field("writable", &self.writable)
            .finish()
    }
}

impl FS {
    /// Open the branch `name` for read/write.
    pub fn open(store: Arc<GitStore>, name: &str) -> Result<Self, StoreError> {
        let ref_name = GitStore::branch_ref(name)?;
        let commit_oid = store
            .refs()
            .resolve_to_oid(&ref_name)?
            .ok_or_else(|| StoreError::NotFound(format!("branch '{name}'")))?;
        let tree_oid = Self::tree_of(&store, commit_oid)?;
        Ok(Self {
            store,
            commit_oid,
            tree_oid,
            ref_name: Some(name.to_string()),
            writable: true,
            report: None,
        })
    }

    /// Open the tag `name` as a read-only snapshot, peeling through an
    /// annotated tag object if necessary.
    pub fn open_tag(store: Arc<GitStore>, name: &str) -> Result<Self, StoreError> {
        let ref_name = RefName::new(format!("refs/tags/{name}"))?;
        let mut oid = store
            .refs()
            .resolve_to_oid(&ref_name)?
            .ok_or_else(|| StoreError::NotFound(format!("tag '{name}'")))?;

        for _ in 0..MAX_TAG_PEEL_DEPTH {
            match store.odb().read(&oid)?.ok_or_else(|| StoreError::NotFound(oid.to_string()))? {
                Object::Commit(_) => break,
                Object::Tag(Tag { target, .. }) => oid = target,
                _ => return Err(StoreError::NotADirectory(oid.to_string())),
            }
        }

        let tree_oid = Self::tree_of(&store, oid)?;
        Ok(Self {
            store,
            commit_oid: oid,
            tree_oid,
            ref_name: None,
            writable: false,
            report: None,
        })
    }

    /// Open a read-only historical snapshot at an arbitrary commit.
    pub fn at_commit(store: Arc<GitStore>, commit_oid: ObjectId) -> Result<Self, StoreError> {
        let tree_oid = Self::tree_of(&store, commit_oid)?;
        Ok(Self {
            store,
            commit_oid,
            tree_oid,
            ref_name: None,
            writable: false,
            report: None,
        })
    }

    fn tree_of(store: &GitStore, commit_oid: ObjectId) -> Result<ObjectId, StoreError> {
        match store.odb().read(&commit_oid)? {
            Some(Object::Commit(Commit { tree, .. })) => Ok(tree),
            Some(_) => Err(StoreError::NotADirectory(commit_oid.to_string())),
            None => Err(StoreError::NotFound(commit_oid.to_string())),
        }
    }

    pub fn commit_oid(&self) -> ObjectId {
        self.commit_oid
    }

    pub fn tree_oid(&self) -> ObjectId {
        self.tree_oid
    }

    pub fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn store(&self) -> &Arc<GitStore> {
        &self.store
    }

    // --- reads ---

    pub fn read(&self, file_path: &str) -> Result<Vec<u8>, StoreError> {
        let path = path::normalize_path(file_path)?;
        let (oid, mode) = path::walk_to(self.store.odb(), self.tree_oid, &path)?;
        if mode.is_tree() {
            return Err(StoreError::IsADirectory(path));
        }
        match self.store.odb().read(&oid)? {
            Some(Object::Blob(blob)) => Ok(blob.serialize_content().to_vec()),
            Some(_) => Err(StoreError::NotADirectory(path)),
            None => Err(StoreError::NotFound(path)),
        }
    }

    pub fn read_text(&self, file_path: &str) -> Result<String, StoreError> {
        Ok(String::from_utf8_lossy(&self.read(file_path)?).into_owned())
    }

    pub fn readlink(&self, file_path: &str) -> Result<String, StoreError> {
        let path = path::normalize_path(file_path)?;
        let (oid, mode) = path::walk_to(self.store.odb(), self.tree_oid, &path)?;
        if mode != FileMode::Symlink {
            return Err(StoreError::InvalidPath(format!("'{path}' is not a symlink")));
        }
        match self.store.odb().read(&oid)? {
            Some(Object::Blob(blob)) => {
                Ok(String::from_utf8_lossy(blob.serialize_content()).into_owned())
            }
            _ => Err(StoreError::NotFound(path)),
        }
    }

    pub fn exists(&self, file_path: &str) -> Result<bool, StoreError> {
        let path = path::normalize_path(file_path)?;
        Ok(path::entry_at_path(self.store.odb(), self.tree_oid, &path)?.is_some())
    }

    pub fn is_dir(&self, file_path: &str) -> Result<bool, StoreError> {
        let path = path::normalize_path(file_path)?;
        match path::entry_at_path(self.store.odb(), self.tree_oid, &path)? {
            Some((_, mode)) => Ok(mode.is_tree()),
            None => Ok(false),
        }
    }

    pub fn file_type(&self, file_path: &str) -> Result<changeset::FileType, StoreError> {
        let path = path::normalize_path(file_path)?;
        let (_, mode) = path::walk_to(self.store.odb(), self.tree_oid, &path)?;
        Ok(changeset::FileType::from(mode))
    }

    /// List immediate children names at `path` (root if `None`).
    pub fn ls(&self, dir_path: Option<&str>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .listdir(dir_path)?
            .into_iter()
            .map(|e| e.name.to_str_lossy().into_owned())
            .collect())
    }

    pub fn listdir(&self, dir_path: Option<&str>) -> Result<Vec<TreeEntry>, StoreError> {
        let normalized = dir_path.map(path::normalize_path).transpose()?;
        path::list_entries_at_path(self.store.odb(), self.tree_oid, normalized.as_deref())
    }

    pub fn walk(&self, dir_path: Option<&str>) -> Result<Vec<WalkLevel>, StoreError> {
        let normalized = dir_path.map(path::normalize_path).transpose()?;
        let (start, prefix) = match normalized {
            None => (self.tree_oid, String::new()),
            Some(p) => {
                let (oid, mode) = path::walk_to(self.store.odb(), self.tree_oid, &p)?;
                if !mode.is_tree() {
                    return Err(StoreError::NotADirectory(p));
                }
                (oid, p)
            }
        };
        path::walk_tree(self.store.odb(), start, &prefix)
    }

    pub fn glob(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        glob::glob_tree(self.store.odb(), self.tree_oid, pattern)
    }

    // --- writes ---

    pub fn write(
        &self,
        file_path: &str,
        data: Vec<u8>,
        mode: Option<FileMode>,
        message: Option<&str>,
    ) -> Result<FS, StoreError> {
        let path = path::normalize_path(file_path)?;
        let mut writes = BTreeMap::new();
        writes.insert(path, WriteEntry::bytes(data, mode));
        self.commit_changes(writes, BTreeSet::new(), message, None)
    }

    pub fn write_text(
        &self,
        file_path: &str,
        text: &str,
        mode: Option<FileMode>,
        message: Option<&str>,
    ) -> Result<FS, StoreError> {
        self.write(file_path, text.as_bytes().to_vec(), mode, message)
    }

    pub fn write_from_file(
        &self,
        file_path: &str,
        src: &std::path::Path,
        mode: Option<FileMode>,
        message: Option<&str>,
    ) -> Result<FS, StoreError> {
        let data = std::fs::read(src)?;
        let mode = match mode {
            Some(m) => Some(m),
            None => Some(path::mode_from_disk(src)?),
        };
        self.write(file_path, data, mode, message)
    }

    pub fn write_symlink(
        &self,
        file_path: &str,
        target: &str,
        message: Option<&str>,
    ) -> Result<FS, StoreError> {
        let path = path::normalize_path(file_path)?;
        let mut writes = BTreeMap::new();
        writes.insert(
            path,
            WriteEntry::bytes(target.as_bytes().to_vec(), Some(FileMode::Symlink)),
        );
        self.commit_changes(writes, BTreeSet::new(), message, None)
    }

    pub fn remove(&self, file_path: &str, message: Option<&str>) -> Result<FS, StoreError> {
        let path = path::normalize_path(file_path)?;
        let (_, mode) = path::walk_to(self.store.odb(), self.tree_oid, &path)?;
        if mode.is_tree() {
            return Err(StoreError::IsADirectory(path));
        }
        let mut removes = BTreeSet::new();
        removes.insert(path);
        self.commit_changes(BTreeMap::new(), removes, message, None)
    }

    /// Apply a batch of writes and removes as a single commit.
    pub fn apply(
        &self,
        writes: BTreeMap<String, WriteEntry>,
        removes: BTreeSet<String>,
        message: Option<&str>,
        operation: Option<&str>,
    ) -> Result<FS, StoreError> {
        self.commit_changes(writes, removes, message, operation)
    }

    /// Open a scoped accumulator for staged writes/removes.
    pub fn batch(&self, message: Option<&str>, operation: Option<&str>) -> crate::batch::Batch {
        crate::batch::Batch::new(self.clone(), message.map(String::from), operation.map(String::from))
    }

    /// The single choke point every mutation passes through: rebuild the
    /// tree, classify the diff, create a commit, CAS the bound ref, append a
    /// reflog entry, and return a fresh `FS` on the result.
    #[tracing::instrument(skip(self, writes, removes, message), fields(ref_name = self.ref_name.as_deref()))]
    pub(crate) fn commit_changes(
        &self,
        writes: BTreeMap<String, WriteEntry>,
        removes: BTreeSet<String>,
        message: Option<&str>,
        operation: Option<&str>,
    ) -> Result<FS, StoreError> {
        if !self.writable {
            return Err(StoreError::PermissionDenied(
                "cannot write to a read-only snapshot".into(),
            ));
        }
        let ref_name_str = self
            .ref_name
            .clone()
            .expect("writable FS is always bound to a ref");

        let odb = self.store.odb();
        let mut resolved = BTreeMap::new();
        let mut rebuild_writes = BTreeMap::new();
        for (path, entry) in writes {
            let oid = match entry.data {
                WriteData::Bytes(bytes) => {
                    odb.write_raw(gitstore_object::ObjectType::Blob, &bytes)?
                }
                WriteData::Oid(oid) => oid,
            };
            let mode = entry.mode.unwrap_or(FileMode::Regular);
            resolved.insert(path.clone(), (oid, mode));
            rebuild_writes.insert(path, WriteEntry::oid(oid, Some(mode)));
        }

        let report = changeset::classify(odb, Some(self.tree_oid), &resolved, &removes)?;
        let new_tree =
            path::rebuild_tree(odb, Some(self.tree_oid), rebuild_writes, removes)?;

        if new_tree == self.tree_oid {
            tracing::debug!("no-op write, ref not advanced");
            return Ok(FS {
                store: self.store.clone(),
                commit_oid: self.commit_oid,
                tree_oid: self.tree_oid,
                ref_name: self.ref_name.clone(),
                writable: self.writable,
                report: Some(report),
            });
        }

        let operation = operation.unwrap_or("commit");
        let commit_message = changeset::format_commit_message(message, &report, Some(operation));
        let commit_message = ensure_trailing_newline(commit_message);

        let sig = self.store.signature_now();
        let commit = Commit {
            tree: new_tree,
            parents: vec![self.commit_oid],
            author: sig.clone(),
            committer: sig,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: commit_message.clone().into(),
        };

        let ref_name = GitStore::branch_ref(&ref_name_str)?;
        let _guard = self.store.commit_lock().lock().unwrap_or_else(|e| e.into_inner());

        let current = self
            .store
            .refs()
            .resolve_to_oid(&ref_name)?
            .ok_or_else(|| StoreError::NotFound(format!("branch '{ref_name_str}'")))?;
        if current != self.commit_oid {
            return Err(StoreError::StaleSnapshot {
                name: ref_name_str,
                expected: self.commit_oid,
                actual: current,
            });
        }

        let new_commit_oid = odb.write(&Object::Commit(commit))?;
        let reflog_message = format!("{operation}: {}", commit_message.lines().next().unwrap_or(""));
        let mut tx = RefTransaction::new();
        tx.update(ref_name, self.commit_oid, new_commit_oid, reflog_message);
        self.store.refs().commit_transaction(tx)?;

        tracing::debug!(new_commit = %new_commit_oid, "committed");

        Ok(FS {
            store: self.store.clone(),
            commit_oid: new_commit_oid,
            tree_oid: new_tree,
            ref_name: Some(ref_name_str),
            writable: true,
            report: Some(report),
        })
    }

    // --- history navigation ---

    /// Walk parents, filtering by path/glob-message/cutoff-time.
    pub fn log(
        &self,
        path_filter: Option<&str>,
        message_glob: Option<&str>,
        before: Option<i64>,
    ) -> Result<Vec<FS>, StoreError> {
        let mut out = Vec::new();
        let mut current = self.clone();
        let normalized_path = path_filter.map(path::normalize_path).transpose()?;

        loop {
            let commit = match self.store.odb().read(&current.commit_oid)? {
                Some(Object::Commit(c)) => c,
                _ => return Err(StoreError::NotFound(current.commit_oid.to_string())),
            };

            if let Some(cutoff) = before {
                if commit.author.date.timestamp > cutoff {
                    match commit.first_parent() {
                        Some(parent) => {
                            current = FS::at_commit(self.store.clone(), *parent)?;
                            continue;
                        }
                        None => break,
                    }
                }
            }

            let path_matches = match &normalized_path {
                None => true,
                Some(p) => {
                    let here = path::entry_at_path(self.store.odb(), current.tree_oid, p)?;
                    match commit.first_parent() {
                        Some(parent) => {
                            let parent_tree = Self::tree_of(&self.store, *parent)?;
                            let there = path::entry_at_path(self.store.odb(), parent_tree, p)?;
                            here != there
                        }
                        None => here.is_some(),
                    }
                }
            };

            let message_matches = match message_glob {
                None => true,
                Some(pattern) => {
                    let first_line = commit.message.lines().next().unwrap_or(b"");
                    glob::glob_match_segment(pattern, &String::from_utf8_lossy(first_line))
                }
            };

            if path_matches && message_matches {
                out.push(current.clone());
            }

            match commit.first_parent() {
                Some(parent) => current = FS::at_commit(self.store.clone(), *parent)?,
                None => break,
            }
        }

        Ok(out)
    }

    /// Walk `n` parents.
    pub fn back(&self, n: usize) -> Result<FS, StoreError> {
        let mut current = self.clone();
        for _ in 0..n {
            let commit = match self.store.odb().read(&current.commit_oid)? {
                Some(Object::Commit(c)) => c,
                _ => return Err(StoreError::NotFound(current.commit_oid.to_string())),
            };
            match commit.first_parent() {
                Some(parent) => current = FS::at_commit(self.store.clone(), *parent)?,
                None => return Err(StoreError::UndoBeyondHistory),
            }
        }
        Ok(current)
    }

    /// `back(1)`.
    pub fn parent(&self) -> Result<FS, StoreError> {
        self.back(1)
    }

    /// Move the bound branch back `n` commits without creating a new commit
    /// object; recorded purely as a reflog entry.
    pub fn undo(&self, n: usize) -> Result<FS, StoreError> {
        if !self.writable {
            return Err(StoreError::PermissionDenied(
                "cannot undo a read-only snapshot".into(),
            ));
        }
        let target = self.back(n)?;
        self.move_ref_reflog_only(target.commit_oid, format!("undo: moved back {n} commits"))
    }

    /// Replay the `n`-th most recent reflog entry forward.
    pub fn redo(&self, n: usize) -> Result<FS, StoreError> {
        if !self.writable {
            return Err(StoreError::PermissionDenied(
                "cannot redo a read-only snapshot".into(),
            ));
        }
        let ref_name_str = self.ref_name.clone().expect("writable implies ref_name");
        let ref_name = GitStore::branch_ref(&ref_name_str)?;
        let entries = self.store.refs().reflog(&ref_name)?;
        if n == 0 || n > entries.len() {
            return Err(StoreError::RedoBeyondReflog);
        }
        let entry = &entries[entries.len() - n];
        if entry.old_oid.is_null() {
            return Err(StoreError::RedoPastCreation);
        }
        self.move_ref_reflog_only(entry.old_oid, format!("redo: moved forward {n} step(s)"))
    }

    fn move_ref_reflog_only(&self, new_oid: ObjectId, reflog_message: String) -> Result<FS, StoreError> {
        let ref_name_str = self.ref_name.clone().expect("writable implies ref_name");
        let ref_name = GitStore::branch_ref(&ref_name_str)?;

        let _guard = self.store.commit_lock().lock().unwrap_or_else(|e| e.into_inner());
        let current = self
            .store
            .refs()
            .resolve_to_oid(&ref_name)?
            .ok_or_else(|| StoreError::NotFound(format!("branch '{ref_name_str}'")))?;
        if current != self.commit_oid {
            return Err(StoreError::StaleSnapshot {
                name: ref_name_str,
                expected: self.commit_oid,
                actual: current,
            });
        }

        let mut tx = RefTransaction::new();
        tx.update(ref_name, self.commit_oid, new_oid, reflog_message);
        self.store.refs().commit_transaction(tx)?;

        FS::at_commit(self.store.clone(), new_oid).map(|mut fs| {
            fs.ref_name = Some(ref_name_str);
            fs.writable = true;
            fs
        })
    }
}

fn ensure_trailing_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

/// Refetch `fs`'s branch and retry a single write on `StaleSnapshot`, with
/// the same backoff schedule as the transaction engine.
pub fn retry_write(
    store: &Arc<GitStore>,
    branch: &str,
    file_path: &str,
    data: Vec<u8>,
    mode: Option<FileMode>,
    message: Option<&str>,
    retries: u32,
) -> Result<FS, StoreError> {
    let mut last_err = None;
    for attempt in 0..retries {
        let fs = FS::open(store.clone(), branch)?;
        match fs.write(file_path, data.clone(), mode, message) {
            Ok(fs) => return Ok(fs),
            Err(e) if e.is_stale_snapshot() => {
                last_err = Some(e);
                crate::tx::backoff_sleep(attempt);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(StoreError::StaleSnapshot {
        name: branch.to_string(),
        expected: ObjectId::NULL_SHA1,
        actual: ObjectId::NULL_SHA1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstore_hash::HashAlgorithm;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Arc<GitStore>) {
        let dir = TempDir::new().unwrap();
        let store = GitStore::open(dir.path().join("repo.git"), "main").unwrap();
        (dir, Arc::new(store))
    }

    fn _unused(_: HashAlgorithm) {}

    #[test]
    fn single_write_then_read() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let new_fs = fs.write("a.txt", b"hi".to_vec(), None, None).unwrap();
        assert_eq!(new_fs.read("a.txt").unwrap(), b"hi");
        assert!(new_fs.exists("a.txt").unwrap());
    }

    #[test]
    fn nested_removal_prunes_root() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("a/b/c", b"x".to_vec(), None, None).unwrap();
        let fs = fs.remove("a/b/c", None).unwrap();
        assert!(fs.ls(None).unwrap().is_empty());
    }

    #[test]
    fn noop_write_does_not_advance_ref() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("a.txt", b"hi".to_vec(), None, None).unwrap();
        let same = fs.write("a.txt", b"hi".to_vec(), None, None).unwrap();
        assert_eq!(same.commit_oid(), fs.commit_oid());
    }

    #[test]
    fn single_add_message_is_exact() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("a.txt", b"hi".to_vec(), None, None).unwrap();
        let commit = match fs.store().odb().read(&fs.commit_oid()).unwrap().unwrap() {
            Object::Commit(c) => c,
            _ => panic!("expected commit"),
        };
        assert_eq!(commit.message.to_str_lossy(), "commit: + a.txt\n");
    }

    #[test]
    fn undo_then_redo_round_trip() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("a", b"1".to_vec(), None, None).unwrap();
        let fs = fs.write("b", b"2".to_vec(), None, None).unwrap();
        let original = fs.commit_oid();
        let undone = fs.undo(1).unwrap();
        assert!(undone.read("b").is_err());
        let redone = undone.redo(1).unwrap();
        assert_eq!(redone.commit_oid(), original);
    }

    #[test]
    fn stale_snapshot_detected() {
        let (_dir, store) = test_store();
        let fs1 = FS::open(store.clone(), "main").unwrap();
        let fs2 = FS::open(store, "main").unwrap();
        fs2.write("z", b"z".to_vec(), None, None).unwrap();
        let err = fs1.write("q", b"q".to_vec(), None, None).unwrap_err();
        assert!(err.is_stale_snapshot());
    }
}
