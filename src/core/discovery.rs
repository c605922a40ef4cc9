//! Glob-based source discovery.
//!
//! Resolves a service's `files` patterns, subtracts its `ignores` (or the
//! default test-file patterns), and returns a sorted, deduplicated list of
//! absolute paths. Invalid patterns are warned about and contribute nothing.

use super::types::ServiceConfig;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Ignore patterns used when a service does not declare its own.
pub const DEFAULT_IGNORES: &[&str] = &[
    "**/*.test.yaml",
    "**/*.test.yml",
    "**/*.spec.yaml",
    "**/*.spec.yml",
    "**/__tests__/**",
];

/// Discover the files of a service relative to `root`.
pub async fn load_files_with_ignores(root: &Path, config: &ServiceConfig) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let config = config.clone();
    tokio::task::spawn_blocking(move || discover(&root, &config))
        .await
        .map_err(|e| Error::Config(format!("file discovery task failed: {}", e)))
}

/// Blocking discovery; see [`load_files_with_ignores`].
pub fn discover(root: &Path, config: &ServiceConfig) -> Vec<PathBuf> {
    let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());

    let files = expand_patterns(&root, config.files.iter().map(String::as_str));
    let ignored = match &config.ignores {
        Some(patterns) => expand_patterns(&root, patterns.iter().map(String::as_str)),
        None => expand_patterns(&root, DEFAULT_IGNORES.iter().copied()),
    };

    files.difference(&ignored).cloned().collect()
}

fn expand_patterns<'a>(root: &Path, patterns: impl Iterator<Item = &'a str>) -> BTreeSet<PathBuf> {
    let mut out = BTreeSet::new();
    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            root.join(pattern)
        };
        let full = full.to_string_lossy().to_string();

        let paths = match glob::glob(&full) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("invalid glob pattern '{}': {}", pattern, e);
                continue;
            }
        };
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    out.insert(path);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("cannot read {}: {}", e.path().display(), e.error()),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "name: X\n").unwrap();
    }

    fn config(files: &[&str], ignores: Option<&[&str]>) -> ServiceConfig {
        ServiceConfig {
            files: files.iter().map(|s| s.to_string()).collect(),
            ignores: ignores.map(|i| i.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn names(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        let root = std::path::absolute(root).unwrap();
        paths
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_discover_sorted_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        touch(dir.path(), "db/account.yaml");
        let found = discover(dir.path(), &config(&["db/*.yaml"], None));
        assert!(found.iter().all(|p| p.is_absolute()));
        assert_eq!(names(dir.path(), &found), vec!["db/account.yaml", "db/user.yaml"]);
    }

    #[test]
    fn test_overlapping_patterns_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        let found = discover(dir.path(), &config(&["db/*.yaml", "db/**/*.yaml"], None));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_ignore_precedence() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        touch(dir.path(), "db/legacy.yaml");
        let found = discover(
            dir.path(),
            &config(&["db/*.yaml"], Some(&["db/legacy.yaml"])),
        );
        assert_eq!(names(dir.path(), &found), vec!["db/user.yaml"]);
    }

    #[test]
    fn test_default_ignores_skip_tests() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        touch(dir.path(), "db/user.test.yaml");
        touch(dir.path(), "db/__tests__/fixture.yaml");
        let found = discover(dir.path(), &config(&["db/**/*.yaml"], None));
        assert_eq!(names(dir.path(), &found), vec!["db/user.yaml"]);
    }

    #[test]
    fn test_explicit_ignores_replace_defaults() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.test.yaml");
        let found = discover(dir.path(), &config(&["db/*.yaml"], Some(&[])));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        let found = discover(dir.path(), &config(&["db/[.yaml", "db/*.yaml"], None));
        assert_eq!(names(dir.path(), &found), vec!["db/user.yaml"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path(), &config(&["nothing/**/*.yaml"], None)).is_empty());
    }

    #[test]
    fn test_discovery_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            touch(dir.path(), &format!("resolvers/{}.yaml", name));
        }
        let cfg = config(&["resolvers/*.yaml"], None);
        assert_eq!(discover(dir.path(), &cfg), discover(dir.path(), &cfg));
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db/user.yaml");
        let found = load_files_with_ignores(dir.path(), &config(&["db/*.yaml"], None))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
