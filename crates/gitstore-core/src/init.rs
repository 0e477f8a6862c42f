use std::fs;
use std::path::{Path, PathBuf};

use gitstore_object::{Commit, Object};
use gitstore_ref::{RefName, RefTransaction};
use gitstore_utils::date::{GitDate, Signature};

use crate::error::StoreError;

/// Default commit identity used when the caller supplies none.
pub fn default_signature() -> Signature {
    Signature {
        name: "gitstore".into(),
        email: "gitstore@localhost".into(),
        date: GitDate::now(),
    }
}

/// Scaffold a fresh bare object database at `path` and create an initial
/// empty-tree commit on `default_branch`, with HEAD pointing at it.
///
/// Re-running against an existing store is a safe no-op (returns the path
/// unchanged without touching existing data).
pub fn init_store(
    path: &Path,
    default_branch: &str,
) -> Result<PathBuf, StoreError> {
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };

    if path.join("HEAD").is_file() {
        return Ok(path);
    }

    fs::create_dir_all(&path)?;
    fs::create_dir_all(path.join("objects").join("info"))?;
    fs::create_dir_all(path.join("objects").join("pack"))?;
    fs::create_dir_all(path.join("refs").join("heads"))?;
    fs::create_dir_all(path.join("refs").join("tags"))?;
    fs::create_dir_all(path.join("refs").join("notes"))?;
    fs::create_dir_all(path.join("refs").join("tx"))?;
    fs::create_dir_all(path.join("logs").join("refs").join("heads"))?;

    fs::write(
        path.join("HEAD"),
        format!("ref: refs/heads/{default_branch}\n"),
    )?;

    fs::write(
        path.join("config"),
        "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = true\n",
    )?;

    fs::write(
        path.join("description"),
        "Unnamed repository; edit this file 'description' to name the repository.\n",
    )?;

    // Seed the default branch with an initial empty-tree commit so that
    // `store.branches().get(default_branch)` resolves right after open,
    // matching the original implementation's GitStore.open auto-create.
    let odb = gitstore_odb::ObjectDatabase::open(path.join("objects"))?;
    let empty_tree = gitstore_object::Tree::new();
    let tree_oid = odb.write(&Object::Tree(empty_tree))?;

    let sig = default_signature();
    let commit = Commit {
        tree: tree_oid,
        parents: Vec::new(),
        author: sig.clone(),
        committer: sig,
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "Initial commit\n".into(),
    };
    let commit_oid = odb.write(&Object::Commit(commit))?;

    let refs = gitstore_ref::FilesRefStore::new(&path);
    let branch_ref = RefName::new(format!("refs/heads/{default_branch}"))
        .map_err(StoreError::from)?;
    let mut tx = RefTransaction::new();
    tx.create(branch_ref, commit_oid, "initial commit");
    refs.commit_transaction(tx)?;

    Ok(path)
}
