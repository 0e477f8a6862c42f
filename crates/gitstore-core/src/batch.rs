//! Scoped accumulator for staged writes/removes, committed once.

use std::collections::{BTreeMap, BTreeSet};

use gitstore_object::FileMode;

use crate::error::StoreError;
use crate::fs::FS;
use crate::path::{self, WriteEntry};

/// Collects writes and removes against a base `FS`, committing them all as
/// one change when [`Batch::commit`] is called.
///
/// Rust has no destructor that can propagate a `Result`, so unlike the
/// source implementation's context manager, commit-on-scope-exit is an
/// explicit consuming method. A batch dropped without calling `commit`
/// simply discards its staged changes — nothing is written.
pub struct Batch {
    base: FS,
    writes: BTreeMap<String, WriteEntry>,
    removes: BTreeSet<String>,
    per_file_messages: Vec<String>,
    message: Option<String>,
    operation: Option<String>,
    committed: bool,
}

impl Batch {
    pub(crate) fn new(base: FS, message: Option<String>, operation: Option<String>) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            removes: BTreeSet::new(),
            per_file_messages: Vec::new(),
            message,
            operation,
            committed: false,
        }
    }

    /// Stage a write. Clears any pending remove of the same path.
    pub fn write(&mut self, file_path: &str, data: Vec<u8>, mode: Option<FileMode>) -> Result<(), StoreError> {
        let path = path::normalize_path(file_path)?;
        self.removes.remove(&path);
        self.per_file_messages
            .push(format!("+ {path}"));
        self.writes.insert(path, WriteEntry::bytes(data, mode));
        Ok(())
    }

    pub fn write_text(&mut self, file_path: &str, text: &str, mode: Option<FileMode>) -> Result<(), StoreError> {
        self.write(file_path, text.as_bytes().to_vec(), mode)
    }

    pub fn write_from_file(
        &mut self,
        file_path: &str,
        src: &std::path::Path,
        mode: Option<FileMode>,
    ) -> Result<(), StoreError> {
        let data = std::fs::read(src)?;
        let mode = match mode {
            Some(m) => Some(m),
            None => Some(path::mode_from_disk(src)?),
        };
        self.write(file_path, data, mode)
    }

    pub fn write_symlink(&mut self, file_path: &str, target: &str) -> Result<(), StoreError> {
        let path = path::normalize_path(file_path)?;
        self.removes.remove(&path);
        self.per_file_messages.push(format!("+ {path} (link)"));
        self.writes.insert(
            path,
            WriteEntry::bytes(target.as_bytes().to_vec(), Some(FileMode::Symlink)),
        );
        Ok(())
    }

    /// Stage a removal, validating against the base tree and pending writes.
    pub fn remove(&mut self, file_path: &str) -> Result<(), StoreError> {
        let path = path::normalize_path(file_path)?;
        if self.writes.remove(&path).is_some() {
            self.per_file_messages.push(format!("- {path}"));
            return Ok(());
        }
        match path::entry_at_path(self.base.store().odb(), self.base.tree_oid(), &path)? {
            Some((_, mode)) if mode.is_tree() => Err(StoreError::IsADirectory(path)),
            Some(_) => {
                self.removes.insert(path.clone());
                self.per_file_messages.push(format!("- {path}"));
                Ok(())
            }
            None => Err(StoreError::NotFound(path)),
        }
    }

    /// Number of staged changes so far.
    pub fn len(&self) -> usize {
        self.writes.len() + self.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.removes.is_empty()
    }

    /// Commit all staged changes as a single commit, or return the base FS
    /// unchanged if nothing was ever staged.
    pub fn commit(mut self) -> Result<FS, StoreError> {
        if self.committed {
            return Err(StoreError::AlreadyCommitted);
        }
        self.committed = true;

        if self.is_empty() {
            return Ok(self.base.clone());
        }

        let message = self.message.clone().unwrap_or_else(|| {
            format!("Batch: {}", self.per_file_messages.join("; "))
        });
        let writes = std::mem::take(&mut self.writes);
        let removes = std::mem::take(&mut self.removes);
        self.base
            .apply(writes, removes, Some(&message), self.operation.as_deref())
    }
}
