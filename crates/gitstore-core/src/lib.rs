//! Versioned file store on top of a bare git object database.
//!
//! A [`GitStore`] owns an [`ObjectDatabase`] and a [`FilesRefStore`] rooted at
//! a single directory laid out like a bare git repository (`objects/`,
//! `refs/heads/`, `refs/notes/`, `refs/tx/`, `logs/refs/heads/`). Everything
//! else in this crate is a view over that pair: snapshots ([`fs::FS`]),
//! change sets ([`changeset`]), disk/repo sync plans ([`sync`]), staged
//! batches ([`batch::Batch`]), multi-writer transactions ([`tx`]), and a
//! parallel notes namespace ([`notes`]).

pub mod batch;
pub mod changeset;
pub mod env;
pub mod error;
pub mod fs;
pub mod glob;
pub mod init;
pub mod notes;
pub mod path;
pub mod sync;
pub mod tx;

pub use error::StoreError;
pub use fs::FS;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gitstore_hash::ObjectId;
use gitstore_odb::ObjectDatabase;
use gitstore_ref::{FilesRefStore, RefName, RefStore};
use gitstore_utils::date::Signature;

/// The central handle tying the object database and ref store together.
///
/// Cheap to clone-by-reference: callers typically hold a `GitStore` behind an
/// `Arc` and hand out [`FS`] snapshots freely. The internal `commit_lock`
/// serializes the compare-and-swap step of every commit so that concurrent
/// writers observe consistent retry behavior rather than racing the
/// filesystem directly.
pub struct GitStore {
    path: PathBuf,
    odb: ObjectDatabase,
    refs: FilesRefStore,
    default_branch: String,
    commit_lock: Mutex<()>,
    identity: Signature,
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.path)
            .field("default_branch", &self.default_branch)
            .finish_non_exhaustive()
    }
}

impl GitStore {
    /// Open an existing store directory, or scaffold a fresh one (with an
    /// initial empty-tree commit on `default_branch`) if it does not yet
    /// look like a store.
    ///
    /// `GITSTORE_DIR` overrides `path` when set; see [`env::EnvOverrides`].
    pub fn open(path: impl AsRef<Path>, default_branch: &str) -> Result<Self, StoreError> {
        let overrides = env::EnvOverrides::from_env();
        let path = overrides.store_dir.unwrap_or_else(|| path.as_ref().to_path_buf());
        let path = init::init_store(&path, default_branch)?;

        let odb = ObjectDatabase::open(path.join("objects"))?;
        let identity = init::default_signature();
        let mut refs = FilesRefStore::new(&path);
        refs.set_committer(identity.clone());

        Ok(Self {
            path,
            odb,
            refs,
            default_branch: default_branch.to_string(),
            commit_lock: Mutex::new(()),
            identity,
        })
    }

    /// Open or create a store, using a caller-supplied identity for commits
    /// and reflog entries instead of the built-in default.
    pub fn open_with_signature(
        path: impl AsRef<Path>,
        default_branch: &str,
        signature: Signature,
    ) -> Result<Self, StoreError> {
        let mut store = Self::open(path, default_branch)?;
        store.refs.set_committer(signature.clone());
        store.identity = signature;
        Ok(store)
    }

    /// The identity used to author/commit, with a fresh timestamp for the
    /// calling moment.
    pub fn signature_now(&self) -> Signature {
        Signature {
            name: self.identity.name.clone(),
            email: self.identity.email.clone(),
            date: gitstore_utils::date::GitDate::now(),
        }
    }

    /// Root directory of the backing bare repository.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The object database.
    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    /// The ref store.
    pub fn refs(&self) -> &FilesRefStore {
        &self.refs
    }

    /// Name of the branch created by `open` when no store existed yet.
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Lock held across the read-current-value-then-CAS window of every
    /// commit, so that two threads writing through the same `GitStore`
    /// don't both observe the same stale tip and both retry pointlessly.
    pub(crate) fn commit_lock(&self) -> &Mutex<()> {
        &self.commit_lock
    }

    /// Resolve a branch name to the tree it currently points at, and open an
    /// [`FS`] snapshot of it. Errors with [`StoreError::NotFound`] if the
    /// branch has no commits.
    pub fn branch(self: &std::sync::Arc<Self>, name: &str) -> Result<FS, StoreError> {
        FS::open(self.clone(), name)
    }

    /// The store's parallel notes namespaces, keyed under `refs/notes/*`.
    pub fn notes(self: &std::sync::Arc<Self>) -> notes::NoteDict {
        notes::NoteDict::new(self.clone())
    }

    /// List local branch names (`refs/heads/*`), sorted.
    pub fn branches(&self) -> Result<Vec<String>, StoreError> {
        self.ref_names("refs/heads/")
    }

    /// List tag names (`refs/tags/*`), sorted.
    pub fn tags(&self) -> Result<Vec<String>, StoreError> {
        self.ref_names("refs/tags/")
    }

    fn ref_names(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for r in self.refs.iter(Some(prefix))? {
            let r = r?;
            names.push(r.name().short_name().to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Resolve an object id prefix to a full [`ObjectId`].
    pub fn resolve_oid(&self, prefix: &str) -> Result<ObjectId, StoreError> {
        Ok(self.odb.resolve_prefix(prefix)?)
    }

    pub(crate) fn branch_ref(name: &str) -> Result<RefName, StoreError> {
        RefName::new(format!("refs/heads/{name}")).map_err(StoreError::from)
    }
}
