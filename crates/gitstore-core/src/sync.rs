//! Disk↔repo copy and sync planner.
//!
//! Two directions (`_to_repo`/`_from_repo`) and two modes (`copy_*` leaves
//! extra destination entries alone, `sync_*` deletes them) share the same
//! source-resolution and diffing machinery.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use gitstore_hash::ObjectId;
use gitstore_object::{FileMode, Object};
use gitstore_odb::ObjectDatabase;

use crate::changeset::{self, ChangeError, ChangeReport};
use crate::error::StoreError;
use crate::fs::FS;
use crate::glob;
use crate::path::{self, WriteEntry};
use crate::GitStore;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub delete: bool,
    pub ignore_existing: bool,
    pub ignore_errors: bool,
    pub checksum: bool,
    pub follow_symlinks: bool,
    pub mode: Option<FileMode>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            ignore_existing: false,
            ignore_errors: false,
            checksum: false,
            follow_symlinks: false,
            mode: None,
        }
    }
}

enum SourceKind {
    Plain,
    ContentsMode,
    Glob,
    Pivot { prefix: String, tail: String },
}

fn classify_source_spec(spec: &str) -> SourceKind {
    if let Some(idx) = spec.find("/./") {
        return SourceKind::Pivot {
            prefix: spec[..idx].to_string(),
            tail: spec[idx + 3..].to_string(),
        };
    }
    if spec.ends_with('/') {
        return SourceKind::ContentsMode;
    }
    if glob::is_glob(spec) {
        return SourceKind::Glob;
    }
    SourceKind::Plain
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

// --- disk-side source enumeration ---

struct DiskEntry {
    dest_rel: String,
    abs_path: PathBuf,
    mode: FileMode,
}

fn walk_disk_tree(
    root: &Path,
    dest_prefix: &str,
    follow_symlinks: bool,
    out: &mut Vec<DiskEntry>,
) -> Result<(), StoreError> {
    let meta = std::fs::symlink_metadata(root)?;
    if meta.file_type().is_symlink() {
        if follow_symlinks {
            if let Ok(real) = std::fs::canonicalize(root) {
                if std::fs::metadata(&real)?.is_dir() {
                    return walk_disk_dir_contents(&real, dest_prefix, follow_symlinks, out);
                }
            }
        }
        out.push(DiskEntry {
            dest_rel: dest_prefix.to_string(),
            abs_path: root.to_path_buf(),
            mode: FileMode::Symlink,
        });
        return Ok(());
    }
    if meta.is_dir() {
        return walk_disk_dir_contents(root, dest_prefix, follow_symlinks, out);
    }
    let mode = path::mode_from_disk(root)?;
    out.push(DiskEntry {
        dest_rel: dest_prefix.to_string(),
        abs_path: root.to_path_buf(),
        mode,
    });
    Ok(())
}

fn walk_disk_dir_contents(
    dir: &Path,
    dest_prefix: &str,
    follow_symlinks: bool,
    out: &mut Vec<DiskEntry>,
) -> Result<(), StoreError> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|e| e.file_name());
    for entry in children {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_dest = join_rel(dest_prefix, &name);
        walk_disk_tree(&entry.path(), &child_dest, follow_symlinks, out)?;
    }
    Ok(())
}

fn glob_disk(spec: &str, follow_symlinks: bool) -> Result<Vec<DiskEntry>, StoreError> {
    let segments: Vec<&str> = spec.trim_matches('/').split('/').collect();
    let mut out = Vec::new();
    expand_disk(Path::new("."), &segments, String::new(), follow_symlinks, &mut out)?;
    if out.is_empty() {
        return Err(StoreError::NoMatches(spec.to_string()));
    }
    Ok(out)
}

fn expand_disk(
    dir: &Path,
    segments: &[&str],
    dest_prefix: String,
    follow_symlinks: bool,
    out: &mut Vec<DiskEntry>,
) -> Result<(), StoreError> {
    let Some((seg, rest)) = segments.split_first() else { return Ok(()) };
    let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|e| e.file_name());
    for entry in children {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !glob::glob_match_segment(seg, &name) {
            continue;
        }
        let child_dest = join_rel(&dest_prefix, &name);
        let child_path = entry.path();
        if rest.is_empty() {
            walk_disk_tree(&child_path, &child_dest, follow_symlinks, out)?;
        } else if child_path.is_dir() {
            expand_disk(&child_path, rest, child_dest, follow_symlinks, out)?;
        }
    }
    Ok(())
}

fn enumerate_disk_source(spec: &str, follow_symlinks: bool) -> Result<Vec<DiskEntry>, StoreError> {
    match classify_source_spec(spec) {
        SourceKind::Pivot { prefix, tail } => {
            let root = Path::new(&prefix).join(&tail);
            let tail_norm = path::normalize_path(&tail)?;
            let mut out = Vec::new();
            walk_disk_tree(&root, &tail_norm, follow_symlinks, &mut out)?;
            Ok(out)
        }
        SourceKind::ContentsMode => {
            let root = Path::new(spec.trim_end_matches('/'));
            if !root.is_dir() {
                return Err(StoreError::NotADirectory(spec.to_string()));
            }
            let mut out = Vec::new();
            walk_disk_dir_contents(root, "", follow_symlinks, &mut out)?;
            Ok(out)
        }
        SourceKind::Glob => glob_disk(spec, follow_symlinks),
        SourceKind::Plain => {
            let root = Path::new(spec);
            std::fs::symlink_metadata(root).map_err(|_| StoreError::NotFound(spec.to_string()))?;
            let name = basename(spec);
            let mut out = Vec::new();
            walk_disk_tree(root, &name, follow_symlinks, &mut out)?;
            Ok(out)
        }
    }
}

// --- repo-side source enumeration ---

struct RepoEntry {
    dest_rel: String,
    oid: ObjectId,
    mode: FileMode,
}

fn flatten_repo_subtree(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    dest_prefix: &str,
    out: &mut Vec<RepoEntry>,
) -> Result<(), StoreError> {
    for entry in path::list_entries_at_path(odb, tree_oid, None)? {
        let name = {
            use bstr::ByteSlice;
            entry.name.to_str_lossy().into_owned()
        };
        let child_dest = join_rel(dest_prefix, &name);
        if entry.mode.is_tree() {
            flatten_repo_subtree(odb, entry.oid, &child_dest, out)?;
        } else {
            out.push(RepoEntry {
                dest_rel: child_dest,
                oid: entry.oid,
                mode: entry.mode,
            });
        }
    }
    Ok(())
}

fn enumerate_repo_source(fs: &FS, spec: &str) -> Result<Vec<RepoEntry>, StoreError> {
    let odb = fs.store().odb();
    match classify_source_spec(spec) {
        SourceKind::Pivot { prefix, tail } => {
            let full = path::normalize_path(&format!("{prefix}/{tail}"))?;
            let (oid, mode) = path::walk_to(odb, fs.tree_oid(), &full)?;
            let tail_norm = path::normalize_path(&tail)?;
            let mut out = Vec::new();
            if mode.is_tree() {
                flatten_repo_subtree(odb, oid, &tail_norm, &mut out)?;
            } else {
                out.push(RepoEntry { dest_rel: tail_norm, oid, mode });
            }
            Ok(out)
        }
        SourceKind::ContentsMode => {
            let root = path::normalize_path(spec.trim_end_matches('/'))?;
            let (oid, mode) = path::walk_to(odb, fs.tree_oid(), &root)?;
            if !mode.is_tree() {
                return Err(StoreError::NotADirectory(root));
            }
            let mut out = Vec::new();
            flatten_repo_subtree(odb, oid, "", &mut out)?;
            Ok(out)
        }
        SourceKind::Glob => {
            let matches = glob::glob_tree(odb, fs.tree_oid(), spec)?;
            let mut out = Vec::new();
            for m in matches {
                let (oid, mode) = path::walk_to(odb, fs.tree_oid(), &m)?;
                let name = basename(&m);
                if mode.is_tree() {
                    flatten_repo_subtree(odb, oid, &name, &mut out)?;
                } else {
                    out.push(RepoEntry { dest_rel: name, oid, mode });
                }
            }
            Ok(out)
        }
        SourceKind::Plain => {
            let root = path::normalize_path(spec)?;
            let (oid, mode) = path::walk_to(odb, fs.tree_oid(), &root)?;
            let name = basename(&root);
            let mut out = Vec::new();
            if mode.is_tree() {
                flatten_repo_subtree(odb, oid, &name, &mut out)?;
            } else {
                out.push(RepoEntry { dest_rel: name, oid, mode });
            }
            Ok(out)
        }
    }
}

fn dedup_by_dest_rel<T>(
    entries: Vec<T>,
    dest_rel: impl Fn(&T) -> &str,
    warnings: &mut Vec<ChangeError>,
) -> Vec<T> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for e in entries {
        if seen.contains(dest_rel(&e)) {
            warnings.push(ChangeError::new(
                dest_rel(&e).to_string(),
                "duplicate destination, keeping first source",
            ));
            continue;
        }
        seen.insert(dest_rel(&e).to_string());
        out.push(e);
    }
    out
}

fn dedup_disk(entries: Vec<DiskEntry>, warnings: &mut Vec<ChangeError>) -> Vec<DiskEntry> {
    dedup_by_dest_rel(entries, |e| &e.dest_rel, warnings)
}

fn dedup_repo(entries: Vec<RepoEntry>, warnings: &mut Vec<ChangeError>) -> Vec<RepoEntry> {
    dedup_by_dest_rel(entries, |e| &e.dest_rel, warnings)
}

fn hash_blob(odb: &ObjectDatabase, data: &[u8]) -> Result<ObjectId, StoreError> {
    Ok(gitstore_hash::hasher::Hasher::hash_object(odb.hash_algo(), "blob", data)?)
}

fn read_disk_content(entry: &DiskEntry) -> std::io::Result<Vec<u8>> {
    if entry.mode == FileMode::Symlink {
        Ok(std::fs::read_link(&entry.abs_path)?
            .to_string_lossy()
            .into_owned()
            .into_bytes())
    } else {
        std::fs::read(&entry.abs_path)
    }
}

/// Plan the writes/removes for copying a disk source into the repo at
/// `dest`, including the tree-conflict filter and (for `delete` mode)
/// deletion of orphaned destination paths.
fn plan_to_repo(
    fs: &FS,
    source: &str,
    dest: &str,
    opts: &SyncOptions,
) -> Result<(BTreeMap<String, WriteEntry>, BTreeSet<String>, Vec<ChangeError>, Vec<ChangeError>), StoreError> {
    let odb = fs.store().odb();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let entries = dedup_disk(enumerate_disk_source(source, opts.follow_symlinks)?, &mut warnings);

    let dest_norm = if dest.is_empty() { String::new() } else { path::normalize_path(dest)? };
    let existing = match path::entry_at_path(odb, fs.tree_oid(), &dest_norm)? {
        Some((oid, mode)) if mode.is_tree() => {
            let mut out = Vec::new();
            flatten_repo_subtree(odb, oid, "", &mut out)?;
            out.into_iter().map(|e| (e.dest_rel, (e.oid, e.mode))).collect::<BTreeMap<_, _>>()
        }
        _ => BTreeMap::new(),
    };

    let commit = match odb.read(&fs.commit_oid())? {
        Some(Object::Commit(c)) => c,
        _ => return Err(StoreError::NotFound(fs.commit_oid().to_string())),
    };
    let commit_ts = commit.author.date.timestamp;

    let mut writes = BTreeMap::new();
    let mut seen_rels = BTreeSet::new();
    for entry in &entries {
        seen_rels.insert(entry.dest_rel.clone());
        let full_dest = join_rel(&dest_norm, &entry.dest_rel);

        if opts.ignore_existing && existing.contains_key(&entry.dest_rel) {
            continue;
        }

        let use_fast_path = !opts.checksum
            && entry.mode != FileMode::Symlink
            && existing.contains_key(&entry.dest_rel)
            && std::fs::metadata(&entry.abs_path)
                .map(|m| m.modified().ok())
                .ok()
                .flatten()
                .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| (d.as_secs() as i64) <= commit_ts)
                .unwrap_or(false);
        if use_fast_path {
            continue;
        }

        match read_disk_content(entry) {
            Ok(data) => {
                let mode = opts.mode.filter(|_| entry.mode == FileMode::Regular).unwrap_or(entry.mode);
                let oid = hash_blob(odb, &data)?;
                if let Some((existing_oid, existing_mode)) = existing.get(&entry.dest_rel) {
                    if *existing_oid == oid && *existing_mode == mode {
                        continue;
                    }
                }
                writes.insert(full_dest, WriteEntry::bytes(data, Some(mode)));
            }
            Err(e) => {
                if opts.ignore_errors {
                    errors.push(ChangeError::new(entry.dest_rel.clone(), e.to_string()));
                } else {
                    return Err(StoreError::from(e));
                }
            }
        }
    }

    let mut removes = BTreeSet::new();
    if opts.delete {
        for rel in existing.keys() {
            if !seen_rels.contains(rel) {
                removes.insert(join_rel(&dest_norm, rel));
            }
        }
    }

    let removes = filter_tree_conflicts(&writes, removes);
    Ok((writes, removes, warnings, errors))
}

/// Plan the writes for copying a repo source onto disk at `dest`. Also
/// returns the set of destination-relative paths that already existed on
/// disk before any write, so callers can classify add vs. update.
fn plan_from_repo(
    fs: &FS,
    source: &str,
    dest: &Path,
    opts: &SyncOptions,
) -> Result<
    (
        Vec<(PathBuf, RepoEntry)>,
        Vec<PathBuf>,
        Vec<ChangeError>,
        Vec<ChangeError>,
        BTreeSet<String>,
    ),
    StoreError,
> {
    let odb = fs.store().odb();
    let mut warnings = Vec::new();
    let errors = Vec::new();

    let entries = dedup_repo(enumerate_repo_source(fs, source)?, &mut warnings);

    let mut existing = BTreeMap::new();
    if dest.exists() {
        let mut disk_entries = Vec::new();
        walk_disk_dir_contents(dest, "", opts.follow_symlinks, &mut disk_entries).ok();
        for e in disk_entries {
            if let Ok(data) = read_disk_content(&e) {
                if let Ok(oid) = hash_blob(odb, &data) {
                    existing.insert(e.dest_rel.clone(), (oid, e.mode));
                }
            }
        }
    }
    let existing_rels: BTreeSet<String> = existing.keys().cloned().collect();

    let mut writes = Vec::new();
    let mut seen_rels = BTreeSet::new();
    for entry in entries {
        seen_rels.insert(entry.dest_rel.clone());
        let abs = dest.join(&entry.dest_rel);
        if opts.ignore_existing && abs.exists() {
            continue;
        }
        if !opts.checksum {
            if let Some((existing_oid, existing_mode)) = existing.get(&entry.dest_rel) {
                if *existing_oid == entry.oid && *existing_mode == entry.mode {
                    continue;
                }
            }
        }
        writes.push((abs, entry));
    }

    let mut removes = Vec::new();
    if opts.delete {
        for rel in existing.keys() {
            if !seen_rels.contains(rel) {
                removes.push(dest.join(rel));
            }
        }
    }

    Ok((writes, removes, warnings, errors, existing_rels))
}

/// Drop any planned delete that a planned write would subsume (the write
/// creates a subtree or a blob in its place), which would otherwise confuse
/// `rebuild_tree`'s implicit type switching.
fn filter_tree_conflicts(
    writes: &BTreeMap<String, WriteEntry>,
    removes: BTreeSet<String>,
) -> BTreeSet<String> {
    removes
        .into_iter()
        .filter(|d| {
            !writes.keys().any(|w| w == d || w.starts_with(&format!("{d}/")))
        })
        .collect()
}

/// Bottom-up remove empty directories under `root`, never removing `root`
/// itself.
fn prune_empty_dirs(root: &Path) -> std::io::Result<()> {
    if !root.is_dir() {
        return Ok(());
    }
    let mut children: Vec<_> = std::fs::read_dir(root)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|e| e.file_name());
    for entry in children {
        let path = entry.path();
        if path.is_dir() {
            prune_empty_dirs(&path)?;
            if std::fs::read_dir(&path)?.next().is_none() {
                let _ = std::fs::remove_dir(&path);
            }
        }
    }
    Ok(())
}

fn ensure_contents_mode(source: &str) -> String {
    match classify_source_spec(source) {
        SourceKind::Plain if !source.ends_with('/') => format!("{source}/"),
        _ => source.to_string(),
    }
}

// --- public entry points ---

#[tracing::instrument(skip(fs, opts, message), fields(source, dest))]
pub fn copy_to_repo(
    fs: &FS,
    source: &str,
    dest: &str,
    opts: &SyncOptions,
    message: Option<&str>,
) -> Result<FS, StoreError> {
    let (writes, removes, warnings, errors) = plan_to_repo(fs, source, dest, opts)?;
    if !errors.is_empty() && writes.is_empty() && removes.is_empty() {
        return Err(StoreError::AllFailed {
            count: errors.len(),
            first_error: errors[0].message.clone(),
        });
    }
    tracing::debug!(writes = writes.len(), removes = removes.len(), "planned copy to repo");
    let mut result = fs.apply(writes, removes, message, Some("cp"))?;
    if let Some(report) = result.report.as_mut() {
        report.warnings.extend(warnings);
        report.errors.extend(errors);
    }
    Ok(result)
}

pub fn copy_to_repo_dry_run(fs: &FS, source: &str, dest: &str, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let (writes, removes, warnings, errors) = plan_to_repo(fs, source, dest, opts)?;
    let odb = fs.store().odb();
    let mut resolved = BTreeMap::new();
    for (path, entry) in &writes {
        let oid = match &entry.data {
            path::WriteData::Bytes(bytes) => hash_blob(odb, bytes)?,
            path::WriteData::Oid(oid) => *oid,
        };
        resolved.insert(path.clone(), (oid, entry.mode.unwrap_or(FileMode::Regular)));
    }
    let mut report = changeset::classify(odb, Some(fs.tree_oid()), &resolved, &removes)?;
    report.warnings.extend(warnings);
    report.errors.extend(errors);
    Ok(report)
}

/// Whether `err` means "the sync source does not exist at all", the case
/// in which sync falls back to deleting everything at the destination
/// instead of erroring.
fn source_is_missing(err: &StoreError) -> bool {
    matches!(err, StoreError::NotADirectory(_) | StoreError::NotFound(_))
}

pub fn sync_to_repo(
    fs: &FS,
    source: &str,
    dest: &str,
    opts: &SyncOptions,
    message: Option<&str>,
) -> Result<FS, StoreError> {
    let mut opts = opts.clone();
    opts.delete = true;
    let source = ensure_contents_mode(source);
    match copy_to_repo(fs, &source, dest, &opts, message.or(Some("sync"))) {
        Err(e) if source_is_missing(&e) => sync_delete_all_in_repo(fs, dest, message.or(Some("sync"))),
        other => other,
    }
}

pub fn sync_to_repo_dry_run(fs: &FS, source: &str, dest: &str, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let mut opts = opts.clone();
    opts.delete = true;
    let source = ensure_contents_mode(source);
    match copy_to_repo_dry_run(fs, &source, dest, &opts) {
        Err(e) if source_is_missing(&e) => sync_delete_all_in_repo_dry_run(fs, dest),
        other => other,
    }
}

#[tracing::instrument(skip(fs, opts), fields(source, dest = %dest.display()))]
pub fn copy_from_repo(fs: &FS, source: &str, dest: &Path, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let (writes, removes, warnings, mut errors, existing_rels) = plan_from_repo(fs, source, dest, opts)?;
    let odb = fs.store().odb();
    let mut report = ChangeReport::default();

    for (abs, entry) in &writes {
        if let Some(parent) = abs.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                if opts.ignore_errors {
                    errors.push(ChangeError::new(entry.dest_rel.clone(), e.to_string()));
                    continue;
                }
                return Err(StoreError::from(e));
            }
        }
        let write_result = write_repo_entry(odb, abs, entry);
        match write_result {
            Ok(()) => {
                let file_type = changeset::FileType::from(entry.mode);
                if existing_rels.contains(&entry.dest_rel) {
                    report.update.push(changeset::FileEntry::new(entry.dest_rel.clone(), file_type));
                } else {
                    report.add.push(changeset::FileEntry::new(entry.dest_rel.clone(), file_type));
                }
            }
            Err(e) => {
                if opts.ignore_errors {
                    errors.push(ChangeError::new(entry.dest_rel.clone(), e.to_string()));
                } else {
                    return Err(StoreError::from(e));
                }
            }
        }
    }

    for path in &removes {
        match std::fs::remove_file(path).or_else(|_| std::fs::remove_dir_all(path)) {
            Ok(()) => report.delete.push(changeset::FileEntry::new(
                path.display().to_string(),
                changeset::FileType::Blob,
            )),
            Err(e) if opts.ignore_errors => {
                errors.push(ChangeError::new(path.display().to_string(), e.to_string()))
            }
            Err(e) => return Err(StoreError::from(e)),
        }
    }

    if opts.delete {
        prune_empty_dirs(dest).ok();
    }

    if !errors.is_empty() && report.is_empty() {
        return Err(StoreError::AllFailed {
            count: errors.len(),
            first_error: errors[0].message.clone(),
        });
    }

    report.warnings = warnings;
    report.errors = errors;
    Ok(report)
}

fn write_repo_entry(odb: &ObjectDatabase, abs: &Path, entry: &RepoEntry) -> std::io::Result<()> {
    let object = odb.read(&entry.oid).map_err(std::io::Error::other)?;
    let data = match object {
        Some(Object::Blob(blob)) => blob.serialize_content().to_vec(),
        _ => return Err(std::io::Error::other("expected blob")),
    };
    if entry.mode == FileMode::Symlink {
        let target = String::from_utf8_lossy(&data).into_owned();
        let _ = std::fs::remove_file(abs);
        std::os::unix::fs::symlink(target, abs)?;
    } else {
        std::fs::write(abs, &data)?;
        if entry.mode == FileMode::Executable {
            let mut perms = std::fs::metadata(abs)?.permissions();
            std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
            std::fs::set_permissions(abs, perms)?;
        }
    }
    Ok(())
}

pub fn copy_from_repo_dry_run(fs: &FS, source: &str, dest: &Path, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let (writes, removes, warnings, errors, existing_rels) = plan_from_repo(fs, source, dest, opts)?;
    let mut report = ChangeReport::default();
    for (_, entry) in &writes {
        let file_type = changeset::FileType::from(entry.mode);
        if existing_rels.contains(&entry.dest_rel) {
            report.update.push(changeset::FileEntry::new(entry.dest_rel.clone(), file_type));
        } else {
            report.add.push(changeset::FileEntry::new(entry.dest_rel.clone(), file_type));
        }
    }
    for path in &removes {
        report.delete.push(changeset::FileEntry::new(
            path.display().to_string(),
            changeset::FileType::Blob,
        ));
    }
    report.warnings = warnings;
    report.errors = errors;
    Ok(report)
}

pub fn sync_from_repo(fs: &FS, source: &str, dest: &Path, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let mut opts = opts.clone();
    opts.delete = true;
    let source = ensure_contents_mode(source);
    match copy_from_repo(fs, &source, dest, &opts) {
        Err(e) if source_is_missing(&e) => {
            let report = local_delete_all_report(dest, opts.follow_symlinks);
            sync_delete_all_local(dest)?;
            Ok(report)
        }
        other => other,
    }
}

pub fn sync_from_repo_dry_run(fs: &FS, source: &str, dest: &Path, opts: &SyncOptions) -> Result<ChangeReport, StoreError> {
    let mut opts = opts.clone();
    opts.delete = true;
    let source = ensure_contents_mode(source);
    match copy_from_repo_dry_run(fs, &source, dest, &opts) {
        Err(e) if source_is_missing(&e) => Ok(local_delete_all_report(dest, opts.follow_symlinks)),
        other => other,
    }
}

/// `sync_to_repo`'s "source does not exist on either side" special case:
/// delete everything currently under `dest` in the repo.
pub fn sync_delete_all_in_repo(fs: &FS, dest: &str, message: Option<&str>) -> Result<FS, StoreError> {
    let odb = fs.store().odb();
    let dest_norm = path::normalize_path(dest)?;
    let removes = match path::entry_at_path(odb, fs.tree_oid(), &dest_norm)? {
        Some((oid, mode)) if mode.is_tree() => {
            let mut out = Vec::new();
            flatten_repo_subtree(odb, oid, &dest_norm, &mut out)?;
            out.into_iter().map(|e| e.dest_rel).collect()
        }
        Some(_) => BTreeSet::from([dest_norm]),
        None => BTreeSet::new(),
    };
    fs.apply(BTreeMap::new(), removes, message, Some("sync"))
}

/// Dry-run counterpart of [`sync_delete_all_in_repo`]: reports what would
/// be deleted without committing anything.
fn sync_delete_all_in_repo_dry_run(fs: &FS, dest: &str) -> Result<ChangeReport, StoreError> {
    let odb = fs.store().odb();
    let dest_norm = path::normalize_path(dest)?;
    let removes: BTreeSet<String> = match path::entry_at_path(odb, fs.tree_oid(), &dest_norm)? {
        Some((oid, mode)) if mode.is_tree() => {
            let mut out = Vec::new();
            flatten_repo_subtree(odb, oid, &dest_norm, &mut out)?;
            out.into_iter().map(|e| e.dest_rel).collect()
        }
        Some(_) => BTreeSet::from([dest_norm]),
        None => BTreeSet::new(),
    };
    changeset::classify(odb, Some(fs.tree_oid()), &BTreeMap::new(), &removes)
}

/// `sync_from_repo`'s "source does not exist" special case: delete
/// everything currently under `dest` on disk.
pub fn sync_delete_all_local(dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    Ok(())
}

/// Report of everything under `dest` that [`sync_delete_all_local`] is
/// about to remove, computed before the removal happens.
fn local_delete_all_report(dest: &Path, follow_symlinks: bool) -> ChangeReport {
    let mut report = ChangeReport::default();
    if !dest.exists() {
        return report;
    }
    let mut entries = Vec::new();
    if walk_disk_dir_contents(dest, "", follow_symlinks, &mut entries).is_ok() {
        for e in entries {
            report.delete.push(changeset::FileEntry::new(
                e.dest_rel,
                changeset::FileType::from(e.mode),
            ));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Arc<GitStore>) {
        let dir = TempDir::new().unwrap();
        let store = GitStore::open(dir.path().join("repo.git"), "main").unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn copy_plain_file_to_repo() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let src = disk_dir.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();

        let opts = SyncOptions::default();
        let result = copy_to_repo(&fs, src.to_str().unwrap(), "imported", &opts, None).unwrap();
        assert_eq!(result.read("imported/a.txt").unwrap(), b"hello");
    }

    #[test]
    fn copy_contents_mode_pours_children_into_dest() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let src_dir = disk_dir.path().join("srcdir");
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(src_dir.join("x.txt"), b"x").unwrap();

        let opts = SyncOptions::default();
        let spec = format!("{}/", src_dir.to_str().unwrap());
        let result = copy_to_repo(&fs, &spec, "dest", &opts, None).unwrap();
        assert_eq!(result.read("dest/x.txt").unwrap(), b"x");
    }

    #[test]
    fn sync_to_repo_deletes_orphans() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("dest/stale.txt", b"old".to_vec(), None, None).unwrap();

        let src_dir = disk_dir.path().join("srcdir");
        std::fs::create_dir(&src_dir).unwrap();
        std::fs::write(src_dir.join("fresh.txt"), b"new").unwrap();

        let opts = SyncOptions::default();
        let spec = format!("{}/", src_dir.to_str().unwrap());
        let result = sync_to_repo(&fs, &spec, "dest", &opts, None).unwrap();
        assert!(result.read("dest/stale.txt").is_err());
        assert_eq!(result.read("dest/fresh.txt").unwrap(), b"new");
    }

    #[test]
    fn copy_from_repo_writes_disk_files() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("src/a.txt", b"content".to_vec(), None, None).unwrap();

        let out_dir = disk_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let opts = SyncOptions::default();
        let report = copy_from_repo(&fs, "src", &out_dir, &opts).unwrap();
        assert_eq!(std::fs::read(out_dir.join("a.txt")).unwrap(), b"content");
        assert_eq!(report.add.len(), 1);
        assert!(report.update.is_empty());
    }

    #[test]
    fn copy_from_repo_classifies_overwrite_as_update() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("src/a.txt", b"new content".to_vec(), None, None).unwrap();

        let out_dir = disk_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        std::fs::write(out_dir.join("a.txt"), b"old content").unwrap();

        let opts = SyncOptions::default();
        let report = copy_from_repo(&fs, "src", &out_dir, &opts).unwrap();
        assert_eq!(std::fs::read(out_dir.join("a.txt")).unwrap(), b"new content");
        assert!(report.add.is_empty());
        assert_eq!(report.update.len(), 1);
    }

    #[test]
    fn glob_source_expands_against_disk() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        std::fs::write(disk_dir.path().join("a.txt"), b"1").unwrap();
        std::fs::write(disk_dir.path().join("b.md"), b"2").unwrap();

        let saved = std::env::current_dir().unwrap();
        std::env::set_current_dir(disk_dir.path()).unwrap();
        let opts = SyncOptions::default();
        let result = copy_to_repo(&fs, "*.txt", "dest", &opts, None);
        std::env::set_current_dir(saved).unwrap();

        let result = result.unwrap();
        assert_eq!(result.read("dest/a.txt").unwrap(), b"1");
        assert!(result.read("dest/b.md").is_err());
    }

    #[test]
    fn sync_delete_all_in_repo_clears_dest() {
        let (_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("dest/a.txt", b"x".to_vec(), None, None).unwrap();
        let result = sync_delete_all_in_repo(&fs, "dest", None).unwrap();
        assert!(result.ls(None).unwrap().is_empty());
    }

    #[test]
    fn sync_to_repo_falls_back_to_delete_all_when_source_missing() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("dest/a.txt", b"x".to_vec(), None, None).unwrap();

        let missing = disk_dir.path().join("does-not-exist");
        let opts = SyncOptions::default();
        let result = sync_to_repo(&fs, missing.to_str().unwrap(), "dest", &opts, None).unwrap();
        assert!(result.ls(None).unwrap().is_empty());
    }

    #[test]
    fn sync_to_repo_dry_run_falls_back_to_delete_all_when_source_missing() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();
        let fs = fs.write("dest/a.txt", b"x".to_vec(), None, None).unwrap();

        let missing = disk_dir.path().join("does-not-exist");
        let opts = SyncOptions::default();
        let report = sync_to_repo_dry_run(&fs, missing.to_str().unwrap(), "dest", &opts).unwrap();
        assert_eq!(report.delete.len(), 1);
        // Dry run: nothing actually removed.
        assert_eq!(fs.read("dest/a.txt").unwrap(), b"x");
    }

    #[test]
    fn sync_from_repo_falls_back_to_delete_all_when_source_missing() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();

        let out_dir = disk_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        std::fs::write(out_dir.join("stale.txt"), b"old").unwrap();

        let opts = SyncOptions::default();
        let report = sync_from_repo(&fs, "does-not-exist", &out_dir, &opts).unwrap();
        assert_eq!(report.delete.len(), 1);
        assert!(!out_dir.exists());
    }

    #[test]
    fn sync_from_repo_dry_run_falls_back_to_delete_all_when_source_missing() {
        let (disk_dir, store) = test_store();
        let fs = FS::open(store, "main").unwrap();

        let out_dir = disk_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        std::fs::write(out_dir.join("stale.txt"), b"old").unwrap();

        let opts = SyncOptions::default();
        let report = sync_from_repo_dry_run(&fs, "does-not-exist", &out_dir, &opts).unwrap();
        assert_eq!(report.delete.len(), 1);
        // Dry run: nothing actually removed.
        assert!(out_dir.join("stale.txt").exists());
    }
}
