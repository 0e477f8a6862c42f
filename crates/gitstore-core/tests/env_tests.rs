//! Tests for `GITSTORE_DIR` environment override handling.
//!
//! These tests manipulate a process-global environment variable, so they use
//! a mutex to ensure they run one at a time and don't interfere with each
//! other.

use std::sync::Mutex;

use gitstore_core::GitStore;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn gitstore_dir_env_overrides_explicit_path() {
    let _lock = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let overridden = dir.path().join("actual-repo.git");
    let ignored = dir.path().join("ignored-repo.git");

    std::env::set_var("GITSTORE_DIR", &overridden);
    let store = GitStore::open(&ignored, "main").unwrap();
    std::env::remove_var("GITSTORE_DIR");

    assert_eq!(store.path(), overridden);
    assert!(!ignored.exists());
}

#[test]
fn absent_gitstore_dir_uses_explicit_path() {
    let _lock = ENV_LOCK.lock().unwrap();
    std::env::remove_var("GITSTORE_DIR");
    let dir = tempfile::tempdir().unwrap();
    let repo_dir = dir.path().join("repo.git");

    let store = GitStore::open(&repo_dir, "main").unwrap();
    assert_eq!(store.path(), repo_dir);
}
