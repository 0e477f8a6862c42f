use std::path::PathBuf;

use gitstore_hash::ObjectId;

/// Errors surfaced by the versioned file store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("stale snapshot: ref '{name}' moved from {expected} to {actual}")]
    StaleSnapshot {
        name: String,
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("all {count} file(s) failed: {first_error}")]
    AllFailed { count: usize, first_error: String },

    #[error("ambiguous object id prefix '{prefix}': matches {count} objects")]
    AmbiguousOid { prefix: String, count: usize },

    #[error("cannot undo past the initial commit")]
    UndoBeyondHistory,

    #[error("cannot redo: no more reflog entries")]
    RedoBeyondReflog,

    #[error("cannot redo past branch creation")]
    RedoPastCreation,

    #[error("glob '{0}' matched no paths")]
    NoMatches(String),

    #[error("batch or transaction already committed")]
    AlreadyCommitted,

    #[error("not a git store directory: {0}")]
    NotAStore(PathBuf),

    #[error(transparent)]
    Object(#[from] gitstore_object::ObjectError),

    #[error(transparent)]
    Odb(#[from] gitstore_odb::OdbError),

    #[error(transparent)]
    Ref(#[from] gitstore_ref::RefError),

    #[error(transparent)]
    Hash(#[from] gitstore_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for errors that a caller should consider retrying after
    /// refetching a fresh snapshot.
    pub fn is_stale_snapshot(&self) -> bool {
        matches!(self, StoreError::StaleSnapshot { .. })
    }
}
