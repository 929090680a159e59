//! Which tree entries a build indexes.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::languages::{is_document_path, is_interesting_path};
use crate::snapshot::FileRecord;
use crate::source::TreeEntry;

/// How much of the tree a build covers beyond the requested paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexScope {
    /// Requested paths, then interesting documentation, then interesting code, up to
    /// the file budget.
    #[default]
    Full,
    /// Requested paths plus whatever was indexed before and still exists.
    Paths,
}

impl std::str::FromStr for IndexScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "paths" => Ok(Self::Paths),
            other => Err(format!("unknown index scope {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub scope: IndexScope,
    /// Total file budget; requested paths count toward it but are never cut.
    pub max_files: usize,
    /// Larger blobs are skipped unless requested.
    pub max_file_bytes: u64,
}

/// Entries to index, requested paths first.
///
/// Requested paths missing from the tree are ignored. Entries without a reported size
/// are not size-filtered.
#[must_use]
pub fn select_paths<'t>(
    tree: &'t [TreeEntry],
    requested: &[String],
    indexed: &BTreeMap<String, FileRecord>,
    limits: &SelectionLimits,
) -> Vec<&'t TreeEntry> {
    let by_path: HashMap<&str, &TreeEntry> = tree.iter().map(|e| (e.path.as_str(), e)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut selected = Vec::new();

    for path in requested {
        match by_path.get(path.as_str()) {
            Some(entry) if seen.insert(entry.path.as_str()) => selected.push(*entry),
            Some(_) => {}
            None => tracing::debug!(file = %path, "requested path not in tree"),
        }
    }

    match limits.scope {
        IndexScope::Paths => {
            for entry in tree {
                if indexed.contains_key(&entry.path) && seen.insert(entry.path.as_str()) {
                    selected.push(entry);
                }
            }
        }
        IndexScope::Full => {
            let (docs, code): (Vec<&TreeEntry>, Vec<&TreeEntry>) = tree
                .iter()
                .filter(|e| !seen.contains(e.path.as_str()))
                .filter(|e| is_interesting_path(&e.path))
                .filter(|e| e.size.is_none_or(|s| s <= limits.max_file_bytes))
                .partition(|e| is_document_path(&e.path));
            for entry in docs.into_iter().chain(code) {
                if selected.len() >= limits.max_files {
                    break;
                }
                selected.push(entry);
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64) -> TreeEntry {
        TreeEntry {
            path: path.into(),
            blob_sha: format!("sha-{path}"),
            size: Some(size),
        }
    }

    fn tree() -> Vec<TreeEntry> {
        vec![
            entry("README.md", 10),
            entry("assets/logo.png", 10),
            entry("docs/guide.md", 10),
            entry("src/big.rs", 1_000_000),
            entry("src/lib.rs", 10),
            entry("src/main.rs", 10),
            entry("tools/gen.py", 10),
        ]
    }

    fn limits(scope: IndexScope, max_files: usize) -> SelectionLimits {
        SelectionLimits {
            scope,
            max_files,
            max_file_bytes: 80_000,
        }
    }

    fn paths(v: &[&TreeEntry]) -> Vec<String> {
        v.iter().map(|e| e.path.clone()).collect()
    }

    #[test]
    fn full_scope_orders_requested_docs_code() {
        let tree = tree();
        let selected = select_paths(
            &tree,
            &["src/main.rs".into()],
            &BTreeMap::new(),
            &limits(IndexScope::Full, 100),
        );
        assert_eq!(
            paths(&selected),
            vec!["src/main.rs", "README.md", "docs/guide.md", "src/lib.rs", "tools/gen.py"]
        );
    }

    #[test]
    fn budget_caps_unrequested_files_only() {
        let tree = tree();
        let requested = vec!["src/big.rs".into(), "src/lib.rs".into(), "tools/gen.py".into()];
        let selected = select_paths(&tree, &requested, &BTreeMap::new(), &limits(IndexScope::Full, 2));
        assert_eq!(paths(&selected), vec!["src/big.rs", "src/lib.rs", "tools/gen.py"]);

        let selected = select_paths(&tree, &[], &BTreeMap::new(), &limits(IndexScope::Full, 2));
        assert_eq!(paths(&selected), vec!["README.md", "docs/guide.md"]);
    }

    #[test]
    fn paths_scope_keeps_previously_indexed() {
        let tree = tree();
        let mut indexed = BTreeMap::new();
        indexed.insert("README.md".to_owned(), FileRecord::new("a", "b"));
        indexed.insert("gone.md".to_owned(), FileRecord::new("a", "b"));
        let selected = select_paths(
            &tree,
            &["src/lib.rs".into(), "missing.rs".into(), "src/lib.rs".into()],
            &indexed,
            &limits(IndexScope::Paths, 1),
        );
        assert_eq!(paths(&selected), vec!["src/lib.rs", "README.md"]);
    }

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!("Full".parse::<IndexScope>().unwrap(), IndexScope::Full);
        assert_eq!("paths".parse::<IndexScope>().unwrap(), IndexScope::Paths);
        assert!("all".parse::<IndexScope>().is_err());
    }
}
