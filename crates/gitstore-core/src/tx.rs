//! Multi-writer transactions: stage onto a temporary branch, then squash
//! the delta onto the current tip of a target branch, retrying if the
//! target moved underneath the squash.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use gitstore_hash::ObjectId;
use gitstore_ref::{RefName, RefStore, RefTransaction};
use rand::Rng;

use crate::error::StoreError;
use crate::fs::FS;
use crate::path::{self, WriteEntry};
use crate::GitStore;

/// Default number of `commit_changes` attempts before a stale-snapshot
/// retry loop gives up and propagates the error.
pub const DEFAULT_RETRIES: u32 = 5;

/// Sleep for the transaction engine's backoff schedule: `min(0.01 * 2^n,
/// 0.2)` seconds, with uniform jitter in `[0, delay)`.
pub(crate) fn backoff_sleep(attempt: u32) {
    let base = (0.01_f64 * 2f64.powi(attempt as i32)).min(0.2);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..base.max(f64::EPSILON));
    std::thread::sleep(Duration::from_secs_f64(jitter));
}

fn working_ref(target: &str, id: &str) -> Result<RefName, StoreError> {
    RefName::new(format!("refs/heads/_tx/{target}/{id}")).map_err(StoreError::from)
}

fn metadata_ref(id: &str) -> Result<RefName, StoreError> {
    RefName::new(format!("refs/tx/{id}")).map_err(StoreError::from)
}

/// A handle to an in-flight transaction: its target branch and generated id.
pub struct Transaction {
    store: Arc<GitStore>,
    target: String,
    id: String,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Open the transaction's current working head for reads/writes.
    pub fn fs(&self) -> Result<FS, StoreError> {
        let name = format!("_tx/{}/{}", self.target, self.id);
        FS::open(self.store.clone(), &name)
    }

    /// Diff the fork-point tree against the working head's current tree.
    pub fn status(&self) -> Result<(Vec<String>, Vec<String>, Vec<String>), StoreError> {
        let fork_tree = self.fork_point_tree()?;
        let working = self.fs()?;
        diff_trees(self.store.odb(), fork_tree, working.tree_oid())
    }

    fn fork_point_tree(&self) -> Result<ObjectId, StoreError> {
        let meta_ref = metadata_ref(&self.id)?;
        let commit_oid = self
            .store
            .refs()
            .resolve_to_oid(&meta_ref)?
            .ok_or_else(|| StoreError::NotFound(format!("transaction '{}'", self.id)))?;
        match self.store.odb().read(&commit_oid)? {
            Some(gitstore_object::Object::Commit(c)) => Ok(c.tree),
            _ => Err(StoreError::NotFound(commit_oid.to_string())),
        }
    }

    /// Abort, deleting both the working head and the fork-point metadata ref.
    pub fn abort(self) -> Result<(), StoreError> {
        let working = working_ref(&self.target, &self.id)?;
        let meta = metadata_ref(&self.id)?;
        if let Some(oid) = self.store.refs().resolve_to_oid(&working)? {
            let mut tx = RefTransaction::new();
            tx.delete(working, oid, "tx: abort");
            self.store.refs().commit_transaction(tx)?;
        }
        if let Some(oid) = self.store.refs().resolve_to_oid(&meta)? {
            let mut tx = RefTransaction::new();
            tx.delete(meta, oid, "tx: abort");
            self.store.refs().commit_transaction(tx)?;
        }
        Ok(())
    }

    /// Compute the delta between the fork point and the working head, then
    /// replay it onto the target branch's *current* tip, retrying on
    /// `StaleSnapshot` with exponential backoff.
    #[tracing::instrument(skip(self, message), fields(target = %self.target, id = %self.id))]
    pub fn commit(self, message: Option<&str>) -> Result<FS, StoreError> {
        let fork_tree = self.fork_point_tree()?;
        let working = self.fs()?;
        let odb = self.store.odb();

        let (adds, updates, removes) = diff_trees(odb, fork_tree, working.tree_oid())?;
        let mut writes = BTreeMap::new();
        for path in adds.into_iter().chain(updates) {
            let (oid, mode) = path::walk_to(odb, working.tree_oid(), &path)?;
            writes.insert(path, WriteEntry::oid(oid, Some(mode)));
        }
        let removes: BTreeSet<String> = removes.into_iter().collect();

        let mut last_err = None;
        for attempt in 0..DEFAULT_RETRIES {
            let target_fs = FS::open(self.store.clone(), &self.target)?;
            match target_fs.apply(writes.clone(), removes.clone(), message, Some("tx")) {
                Ok(new_fs) => {
                    let working_ref_name = working_ref(&self.target, &self.id)?;
                    let meta_ref_name = metadata_ref(&self.id)?;
                    if let Some(oid) = self.store.refs().resolve_to_oid(&working_ref_name)? {
                        let mut tx = RefTransaction::new();
                        tx.delete(working_ref_name, oid, "tx: commit");
                        self.store.refs().commit_transaction(tx)?;
                    }
                    if let Some(oid) = self.store.refs().resolve_to_oid(&meta_ref_name)? {
                        let mut tx = RefTransaction::new();
                        tx.delete(meta_ref_name, oid, "tx: commit");
                        self.store.refs().commit_transaction(tx)?;
                    }
                    return Ok(new_fs);
                }
                Err(e) if e.is_stale_snapshot() => {
                    tracing::debug!(attempt, "target moved, retrying squash");
                    last_err = Some(e);
                    backoff_sleep(attempt);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(StoreError::StaleSnapshot {
            name: self.target.clone(),
            expected: ObjectId::NULL_SHA1,
            actual: ObjectId::NULL_SHA1,
        }))
    }
}

/// Begin a transaction against `target_branch`: both the working head and
/// the fork-point metadata ref are created at the branch's current tip.
pub fn tx_begin(store: Arc<GitStore>, target_branch: &str) -> Result<Transaction, StoreError> {
    let target_fs = FS::open(store.clone(), target_branch)?;
    let id = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();

    let working = working_ref(target_branch, &id)?;
    let meta = metadata_ref(&id)?;

    let mut tx = RefTransaction::new();
    tx.create(working, target_fs.commit_oid(), "tx: begin");
    tx.create(meta, target_fs.commit_oid(), "tx: begin");
    store.refs().commit_transaction(tx)?;

    Ok(Transaction {
        store,
        target: target_branch.to_string(),
        id,
    })
}

/// Resume a handle to a transaction previously created with `tx_begin`.
pub fn tx_open(store: Arc<GitStore>, target_branch: &str, id: &str) -> Transaction {
    Transaction {
        store,
        target: target_branch.to_string(),
        id: id.to_string(),
    }
}

/// List the ids of every live transaction working head under `refs/heads/_tx/`.
pub fn tx_list(store: &GitStore) -> Result<Vec<String>, StoreError> {
    let mut out = Vec::new();
    for r in store.refs().iter(Some("refs/heads/_tx/"))? {
        let r = r?;
        out.push(r.name().as_str().trim_start_matches("refs/heads/_tx/").to_string());
    }
    out.sort();
    Ok(out)
}

fn diff_trees(
    odb: &gitstore_odb::ObjectDatabase,
    base: ObjectId,
    target: ObjectId,
) -> Result<(Vec<String>, Vec<String>, Vec<String>), StoreError> {
    let base_files = flatten(odb, base, String::new())?;
    let target_files = flatten(odb, target, String::new())?;

    let mut adds = Vec::new();
    let mut updates = Vec::new();
    for (path, entry) in &target_files {
        match base_files.get(path) {
            None => adds.push(path.clone()),
            Some(base_entry) if base_entry != entry => updates.push(path.clone()),
            Some(_) => {}
        }
    }
    let mut removes: Vec<String> = base_files
        .keys()
        .filter(|p| !target_files.contains_key(*p))
        .cloned()
        .collect();

    adds.sort();
    updates.sort();
    removes.sort();
    Ok((adds, updates, removes))
}

fn flatten(
    odb: &gitstore_odb::ObjectDatabase,
    tree: ObjectId,
    prefix: String,
) -> Result<BTreeMap<String, (ObjectId, gitstore_object::FileMode)>, StoreError> {
    let mut out = BTreeMap::new();
    for entry in path::list_entries_at_path(odb, tree, None)? {
        let name = {
            use bstr::ByteSlice;
            entry.name.to_str_lossy().into_owned()
        };
        let full = if prefix.is_empty() { name } else { format!("{prefix}/{name}") };
        if entry.mode.is_tree() {
            out.extend(flatten(odb, entry.oid, full)?);
        } else {
            out.insert(full, (entry.oid, entry.mode));
        }
    }
    Ok(out)
}
