//! Classifies a set of writes/removes against a base tree into an
//! add/update/delete report, and builds commit messages from it.

use std::collections::{BTreeMap, BTreeSet};

use gitstore_hash::ObjectId;
use gitstore_object::FileMode;
use gitstore_odb::ObjectDatabase;
use serde::Serialize;

use crate::error::StoreError;
use crate::path;

/// Coarse type of a tree entry, as reported to callers (distinct from
/// `FileMode`, which also carries the raw git mode bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Blob,
    Exec,
    Link,
    Tree,
}

impl From<FileMode> for FileType {
    fn from(mode: FileMode) -> Self {
        match mode {
            FileMode::Regular => FileType::Blob,
            FileMode::Executable => FileType::Exec,
            FileMode::Symlink => FileType::Link,
            FileMode::Tree => FileType::Tree,
            FileMode::Gitlink | FileMode::Unknown => FileType::Blob,
        }
    }
}

impl FileType {
    /// Suffix appended to an auto-generated message for a single add/update,
    /// empty for `Blob` (the common case needs no annotation).
    fn message_suffix(self) -> &'static str {
        match self {
            FileType::Blob => "",
            FileType::Exec => " (executable)",
            FileType::Link => " (link)",
            FileType::Tree => " (tree)",
        }
    }
}

/// One changed path and the kind of entry it is (or was, for the source of
/// a copy).
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, file_type: FileType) -> Self {
        Self {
            path: path.into(),
            file_type,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A non-fatal-unless-accumulated failure against one path, used both for
/// `errors` (fatal unless `ignore_errors`) and `warnings` (never fatal).
#[derive(Debug, Clone, Serialize)]
pub struct ChangeError {
    pub path: String,
    #[serde(rename = "error")]
    pub message: String,
}

impl ChangeError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of classifying a bulk operation: sorted add/update/delete lists
/// plus any per-path errors/warnings collected along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeReport {
    pub add: Vec<FileEntry>,
    pub update: Vec<FileEntry>,
    pub delete: Vec<FileEntry>,
    pub errors: Vec<ChangeError>,
    pub warnings: Vec<ChangeError>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }
}

/// Classify `writes`/`removes` against `base_tree` into a [`ChangeReport`].
///
/// `writes` and `removes` are plain maps here (not `path::WriteEntry`) so
/// this can be called after the caller has already resolved each write to
/// its final `(oid, mode)`, which every write path does before staging.
pub fn classify(
    odb: &ObjectDatabase,
    base_tree: Option<ObjectId>,
    writes: &BTreeMap<String, (ObjectId, FileMode)>,
    removes: &BTreeSet<String>,
) -> Result<ChangeReport, StoreError> {
    let mut report = ChangeReport::default();

    for (path, &(oid, mode)) in writes {
        let existing = match base_tree {
            Some(tree) => path::entry_at_path(odb, tree, path)?,
            None => None,
        };
        let entry = FileEntry::new(path.clone(), FileType::from(mode));
        match existing {
            Some((existing_oid, existing_mode))
                if existing_oid == oid && existing_mode == mode => {}
            Some(_) => report.update.push(entry),
            None => report.add.push(entry),
        }
    }

    for path in removes {
        let Some(tree) = base_tree else { continue };
        if let Some((_, mode)) = path::entry_at_path(odb, tree, path)? {
            if !mode.is_tree() {
                report.delete.push(FileEntry::new(path.clone(), FileType::from(mode)));
            }
        }
    }

    report.add.sort_by(|a, b| a.path.cmp(&b.path));
    report.update.sort_by(|a, b| a.path.cmp(&b.path));
    report.delete.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(report)
}

/// Build the default commit message for a report, following the source
/// implementation's `_auto_message` rules verbatim.
pub fn auto_message(report: &ChangeReport, operation: Option<&str>) -> String {
    let total = report.total_count();
    if total == 0 {
        return "No changes".to_string();
    }
    if total == 1 {
        if let Some(e) = report.add.first() {
            return format!("+ {}{}", e.path, e.file_type.message_suffix());
        }
        if let Some(e) = report.update.first() {
            return format!("~ {}{}", e.path, e.file_type.message_suffix());
        }
        if let Some(e) = report.delete.first() {
            return format!("- {}", e.path);
        }
    }

    let prefix = match operation {
        Some(op) => format!("Batch {op}:"),
        None => "Batch:".to_string(),
    };
    let mut counts = Vec::new();
    if !report.add.is_empty() {
        counts.push(format!("+{}", report.add.len()));
    }
    if !report.update.is_empty() {
        counts.push(format!("~{}", report.update.len()));
    }
    if !report.delete.is_empty() {
        counts.push(format!("-{}", report.delete.len()));
    }
    format!("{prefix} {}", counts.join(" "))
}

/// Interpolate a user-supplied message template against a report, or fall
/// back to [`auto_message`] when `template` is `None`.
///
/// Supported placeholders: `{default}`, `{add_count}`, `{update_count}`,
/// `{delete_count}`, `{total_count}`, `{op}`.
pub fn format_commit_message(
    template: Option<&str>,
    report: &ChangeReport,
    operation: Option<&str>,
) -> String {
    let default = auto_message(report, operation);
    let Some(template) = template else {
        return default;
    };
    template
        .replace("{default}", &default)
        .replace("{add_count}", &report.add.len().to_string())
        .replace("{update_count}", &report.update.len().to_string())
        .replace("{delete_count}", &report.delete.len().to_string())
        .replace("{total_count}", &report.total_count().to_string())
        .replace("{op}", operation.unwrap_or(""))
}
