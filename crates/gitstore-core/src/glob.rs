//! Dotfile-aware glob matching for a single path segment.
//!
//! Deliberately smaller than a full git pathname wildcard matcher (which
//! would also handle `**`): this only needs `*`/`?` matching within one
//! path segment, with the fnmatch convention that a leading `.` is never
//! matched by a wildcard unless the pattern segment itself starts with `.`.

use bstr::ByteSlice;
use gitstore_hash::ObjectId;
use gitstore_odb::ObjectDatabase;

use crate::error::StoreError;
use crate::path;

/// Match a single path segment (no `/`) against a single glob segment.
pub fn glob_match_segment(pattern: &str, name: &str) -> bool {
    if name.starts_with('.') && !pattern.starts_with('.') {
        return false;
    }
    match_segment(pattern.as_bytes(), name.as_bytes())
}

fn match_segment(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // '*' matches zero or more characters; try every split.
            for i in 0..=name.len() {
                if match_segment(&pattern[1..], &name[i..]) {
                    return true;
                }
            }
            false
        }
        (Some(b'?'), Some(_)) => match_segment(&pattern[1..], &name[1..]),
        (Some(b'?'), None) => false,
        (Some(&p), Some(&n)) if p == n => match_segment(&pattern[1..], &name[1..]),
        _ => false,
    }
}

/// True if `pattern` contains a glob metacharacter.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Expand a (possibly multi-segment) glob pattern against a tree, returning
/// matching paths sorted lexicographically. Fails with `NoMatches` if
/// nothing matches.
pub fn glob_tree(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    pattern: &str,
) -> Result<Vec<String>, StoreError> {
    let normalized = pattern.trim_matches('/');
    let segments: Vec<&str> = normalized.split('/').collect();
    let mut matches = Vec::new();
    expand(odb, tree_oid, &segments, String::new(), &mut matches)?;
    matches.sort();
    if matches.is_empty() {
        return Err(StoreError::NoMatches(pattern.to_string()));
    }
    Ok(matches)
}

fn expand(
    odb: &ObjectDatabase,
    tree_oid: ObjectId,
    segments: &[&str],
    prefix: String,
    out: &mut Vec<String>,
) -> Result<(), StoreError> {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(prefix.trim_start_matches('/').to_string());
        return Ok(());
    };

    let entries = path::list_entries_at_path(odb, tree_oid, None)?;
    for entry in entries {
        let name = entry.name.to_str_lossy().into_owned();
        if !glob_match_segment(segment, &name) {
            continue;
        }
        let child_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if rest.is_empty() {
            out.push(child_path);
        } else if entry.mode.is_tree() {
            expand(odb, entry.oid, rest, child_path, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitstore_hash::HashAlgorithm;
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn test_odb() -> (TempDir, ObjectDatabase) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        std::fs::create_dir_all(dir.path().join("pack")).unwrap();
        let odb = ObjectDatabase::open_with_algo(dir.path(), HashAlgorithm::Sha1).unwrap();
        (dir, odb)
    }

    #[test]
    fn star_matches_within_segment() {
        assert!(glob_match_segment("*.txt", "a.txt"));
        assert!(!glob_match_segment("*.txt", "a.md"));
    }

    #[test]
    fn star_does_not_match_leading_dot() {
        assert!(!glob_match_segment("*", ".hidden"));
        assert!(glob_match_segment(".*", ".hidden"));
    }

    #[test]
    fn question_matches_one_char() {
        assert!(glob_match_segment("a?c", "abc"));
        assert!(!glob_match_segment("a?c", "ac"));
    }

    #[test]
    fn glob_tree_expands_multi_segment() {
        let (_dir, odb) = test_odb();
        let mut writes = BTreeMap::new();
        writes.insert("src/a.txt".to_string(), path::WriteEntry::bytes(b"1".to_vec(), None));
        writes.insert("src/b.md".to_string(), path::WriteEntry::bytes(b"2".to_vec(), None));
        let tree = path::rebuild_tree(&odb, None, writes, BTreeSet::new()).unwrap();
        let matches = glob_tree(&odb, tree, "src/*.txt").unwrap();
        assert_eq!(matches, vec!["src/a.txt".to_string()]);
    }

    #[test]
    fn glob_tree_no_matches_errors() {
        let (_dir, odb) = test_odb();
        let tree = path::rebuild_tree(&odb, None, BTreeMap::new(), BTreeSet::new()).unwrap();
        assert!(glob_tree(&odb, tree, "*.txt").is_err());
    }
}
