//! Commit-hash-keyed text notes, stored as a parallel commit chain under
//! `refs/notes/<namespace>`.
//!
//! Entries may live at a flat path (`<hash>`) or, for namespaces with many
//! entries, fanned out two levels (`<hash[..2]>/<hash[2..]>`). Reads try
//! flat first, then fan-out. Writes always produce a flat entry and prune
//! any stale fan-out entry for the same key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gitstore_hash::ObjectId;
use gitstore_object::{Commit, Object};
use gitstore_ref::{RefName, RefStore, RefTransaction};

use crate::error::StoreError;
use crate::fs::FS;
use crate::path::{self, WriteEntry};
use crate::GitStore;

fn validate_hex40(hash: &str) -> Result<(), StoreError> {
    if hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(format!(
            "'{hash}' is not a lowercase 40-hex commit hash"
        )))
    }
}

fn fanout_path(hash: &str) -> String {
    format!("{}/{}", &hash[..2], &hash[2..])
}

/// A single notes namespace: a commit-hash keyed map of text blobs.
pub struct NoteNamespace {
    store: Arc<GitStore>,
    namespace: String,
}

impl NoteNamespace {
    pub(crate) fn new(store: Arc<GitStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    fn ref_name(&self) -> Result<RefName, StoreError> {
        RefName::new(format!("refs/notes/{}", self.namespace)).map_err(StoreError::from)
    }

    fn tip(&self) -> Result<Option<ObjectId>, StoreError> {
        Ok(self.store.refs().resolve_to_oid(&self.ref_name()?)?)
    }

    fn tip_tree(&self) -> Result<Option<ObjectId>, StoreError> {
        match self.tip()? {
            Some(commit_oid) => match self.store.odb().read(&commit_oid)? {
                Some(Object::Commit(Commit { tree, .. })) => Ok(Some(tree)),
                _ => Err(StoreError::NotFound(commit_oid.to_string())),
            },
            None => Ok(None),
        }
    }

    /// Look up the note for `hash`, trying the flat layout then fan-out.
    pub fn get(&self, hash: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_hex40(hash)?;
        let Some(tree) = self.tip_tree()? else { return Ok(None) };
        let odb = self.store.odb();

        if let Some((oid, mode)) = path::entry_at_path(odb, tree, hash)? {
            if !mode.is_tree() {
                return Ok(Some(read_blob(odb, oid)?));
            }
        }
        if let Some((oid, mode)) = path::entry_at_path(odb, tree, &fanout_path(hash))? {
            if !mode.is_tree() {
                return Ok(Some(read_blob(odb, oid)?));
            }
        }
        Ok(None)
    }

    pub fn get_text(&self, hash: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(hash)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn contains(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.get(hash)?.is_some())
    }

    /// Set the note for `hash` to `content`, committing immediately.
    pub fn set(&self, hash: &str, content: Vec<u8>) -> Result<(), StoreError> {
        validate_hex40(hash)?;
        let mut writes = BTreeMap::new();
        writes.insert(hash.to_string(), content);
        self.apply(writes, BTreeSet::new())
    }

    pub fn set_text(&self, hash: &str, text: &str) -> Result<(), StoreError> {
        self.set(hash, text.as_bytes().to_vec())
    }

    /// Delete the note for `hash`, committing immediately. A no-op if
    /// absent in both layouts.
    pub fn del(&self, hash: &str) -> Result<(), StoreError> {
        validate_hex40(hash)?;
        let mut removes = BTreeSet::new();
        removes.insert(hash.to_string());
        self.apply(BTreeMap::new(), removes)
    }

    /// Count of currently-set keys across both layouts.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.iter()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Enumerate every hex key currently set, in either layout.
    pub fn iter(&self) -> Result<Vec<String>, StoreError> {
        let Some(tree) = self.tip_tree()? else { return Ok(Vec::new()) };
        let odb = self.store.odb();
        let mut keys = BTreeSet::new();
        for entry in path::list_entries_at_path(odb, tree, None)? {
            let name = {
                use bstr::ByteSlice;
                entry.name.to_str_lossy().into_owned()
            };
            if !entry.mode.is_tree() && name.len() == 40 {
                keys.insert(name);
                continue;
            }
            if entry.mode.is_tree() && name.len() == 2 {
                for child in path::list_entries_at_path(odb, entry.oid, None)? {
                    let child_name = {
                        use bstr::ByteSlice;
                        child.name.to_str_lossy().into_owned()
                    };
                    if !child.mode.is_tree() && child_name.len() == 38 {
                        keys.insert(format!("{name}{child_name}"));
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Read the note keyed by `branch`'s current tip commit hash.
    pub fn current_ref(&self, branch: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let fs = FS::open(self.store.clone(), branch)?;
        self.get(&fs.commit_oid().to_hex())
    }

    /// Set the note keyed by `branch`'s current tip commit hash.
    pub fn set_current_ref(&self, branch: &str, content: Vec<u8>) -> Result<(), StoreError> {
        let fs = FS::open(self.store.clone(), branch)?;
        self.set(&fs.commit_oid().to_hex(), content)
    }

    /// Open a scoped accumulator for multiple `set`/`del` operations,
    /// applied as one commit.
    pub fn batch(&self) -> NotesBatch {
        NotesBatch {
            namespace: self,
            writes: BTreeMap::new(),
            removes: BTreeSet::new(),
        }
    }

    fn apply(
        &self,
        writes: BTreeMap<String, Vec<u8>>,
        removes: BTreeSet<String>,
    ) -> Result<(), StoreError> {
        if writes.is_empty() && removes.is_empty() {
            return Ok(());
        }
        let ref_name = self.ref_name()?;
        let odb = self.store.odb();
        let _guard = self.store.commit_lock().lock().unwrap_or_else(|e| e.into_inner());

        // Re-read the tip *inside* the lock to narrow the CAS race window.
        let old_tip = self.tip()?;
        let base_tree = match old_tip {
            Some(commit_oid) => match odb.read(&commit_oid)? {
                Some(Object::Commit(Commit { tree, .. })) => Some(tree),
                _ => return Err(StoreError::NotFound(commit_oid.to_string())),
            },
            None => None,
        };

        let mut rebuild_writes = BTreeMap::new();
        let mut rebuild_removes = BTreeSet::new();
        for path in &removes {
            rebuild_removes.insert(path.clone());
            rebuild_removes.insert(fanout_path(path));
        }
        for (hash, content) in writes {
            rebuild_removes.insert(fanout_path(&hash));
            let oid = odb.write_raw(gitstore_object::ObjectType::Blob, &content)?;
            rebuild_writes.insert(hash, WriteEntry::oid(oid, None));
        }

        let new_tree = path::rebuild_tree(odb, base_tree, rebuild_writes, rebuild_removes)?;
        if Some(new_tree) == base_tree {
            return Ok(());
        }

        let sig = self.store.signature_now();
        let commit = Commit {
            tree: new_tree,
            parents: old_tip.into_iter().collect(),
            author: sig.clone(),
            committer: sig,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: "note: update\n".into(),
        };
        let new_commit_oid = odb.write(&Object::Commit(commit))?;

        let mut tx = RefTransaction::new();
        match old_tip {
            Some(old) => tx.update(ref_name, old, new_commit_oid, "note: update"),
            None => tx.create(ref_name, new_commit_oid, "note: update"),
        }
        self.store.refs().commit_transaction(tx)?;
        Ok(())
    }
}

fn read_blob(odb: &gitstore_odb::ObjectDatabase, oid: ObjectId) -> Result<Vec<u8>, StoreError> {
    match odb.read(&oid)? {
        Some(Object::Blob(blob)) => Ok(blob.serialize_content().to_vec()),
        _ => Err(StoreError::NotFound(oid.to_string())),
    }
}

/// Scoped accumulator of `set`/`del` operations on a [`NoteNamespace`],
/// applying all deletes (with fan-out pruning) before all writes, in one
/// commit.
pub struct NotesBatch<'a> {
    namespace: &'a NoteNamespace,
    writes: BTreeMap<String, Vec<u8>>,
    removes: BTreeSet<String>,
}

impl<'a> NotesBatch<'a> {
    pub fn set(&mut self, hash: &str, content: Vec<u8>) -> Result<(), StoreError> {
        validate_hex40(hash)?;
        self.removes.remove(hash);
        self.writes.insert(hash.to_string(), content);
        Ok(())
    }

    pub fn del(&mut self, hash: &str) -> Result<(), StoreError> {
        validate_hex40(hash)?;
        self.writes.remove(hash);
        self.removes.insert(hash.to_string());
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.namespace.apply(self.writes, self.removes)
    }
}

/// `store.notes` sugar: `dict.get("ns")` resolves a [`NoteNamespace`];
/// `dict.commits()` is the namespace conventionally named `"commits"`.
pub struct NoteDict {
    store: Arc<GitStore>,
}

impl NoteDict {
    pub(crate) fn new(store: Arc<GitStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, namespace: &str) -> NoteNamespace {
        NoteNamespace::new(self.store.clone(), namespace)
    }

    pub fn commits(&self) -> NoteNamespace {
        self.get("commits")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn test_store() -> (tempfile::TempDir, Arc<GitStore>) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = GitStore::open(dir.path().join("repo.git"), "main").unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn set_then_get_flat() {
        let (_dir, store) = test_store();
        let ns = NoteNamespace::new(store, "commits");
        ns.set_text(HASH_A, "hello").unwrap();
        assert_eq!(ns.get_text(HASH_A).unwrap().unwrap(), "hello");
    }

    #[test]
    fn rejects_malformed_hash() {
        let (_dir, store) = test_store();
        let ns = NoteNamespace::new(store, "commits");
        assert!(ns.set_text("not-a-hash", "x").is_err());
    }

    #[test]
    fn del_removes_note() {
        let (_dir, store) = test_store();
        let ns = NoteNamespace::new(store, "commits");
        ns.set_text(HASH_A, "hello").unwrap();
        ns.del(HASH_A).unwrap();
        assert!(ns.get(HASH_A).unwrap().is_none());
    }

    #[test]
    fn batch_aggregates_into_one_commit() {
        let (_dir, store) = test_store();
        let ns = NoteNamespace::new(store, "commits");
        let mut batch = ns.batch();
        batch.set(HASH_A, b"one".to_vec()).unwrap();
        batch.set(HASH_B, b"two".to_vec()).unwrap();
        batch.commit().unwrap();
        assert_eq!(ns.get(HASH_A).unwrap().unwrap(), b"one");
        assert_eq!(ns.get(HASH_B).unwrap().unwrap(), b"two");
        assert_eq!(ns.len().unwrap(), 2);
    }

    #[test]
    fn current_ref_keys_off_branch_tip() {
        let (_dir, store) = test_store();
        let fs = FS::open(store.clone(), "main").unwrap();
        fs.write("a.txt", b"x".to_vec(), None, None).unwrap();
        let ns = NoteNamespace::new(store, "commits");
        ns.set_current_ref("main", b"annotation".to_vec()).unwrap();
        assert_eq!(ns.current_ref("main").unwrap().unwrap(), b"annotation");
    }
}
