//! End-to-end tests for the transaction engine: begin, stage, commit/abort.

use std::sync::Arc;

use gitstore_core::tx::{tx_begin, tx_list};
use gitstore_core::GitStore;

fn test_store() -> (tempfile::TempDir, Arc<GitStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = GitStore::open(dir.path().join("repo.git"), "main").unwrap();
    (dir, Arc::new(store))
}

#[test]
fn transaction_writes_are_invisible_until_commit() {
    let (_dir, store) = test_store();
    let tx = tx_begin(store.clone(), "main").unwrap();
    tx.fs().unwrap().write("staged.txt", b"wip".to_vec(), None, None).unwrap();

    let main = store.branch("main").unwrap();
    assert!(main.read("staged.txt").is_err());

    let result = tx.commit(None).unwrap();
    assert_eq!(result.read("staged.txt").unwrap(), b"wip");
}

#[test]
fn aborted_transaction_leaves_target_untouched() {
    let (_dir, store) = test_store();
    let tx = tx_begin(store.clone(), "main").unwrap();
    let id = tx.id().to_string();
    tx.fs().unwrap().write("staged.txt", b"wip".to_vec(), None, None).unwrap();
    tx.abort().unwrap();

    assert!(!tx_list(&store).unwrap().contains(&id));
    let main = store.branch("main").unwrap();
    assert!(main.read("staged.txt").is_err());
}
