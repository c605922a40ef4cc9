//! Per-namespace services: database types, resolvers, executors, and auth.
//!
//! Every service owns a file set. Loading discovers the files, loads each one
//! on its own task, joins all of them, and merges the results in sorted path
//! order so the final table does not depend on completion order. A name
//! declared twice in one namespace is fatal.

pub mod auth;
pub mod executor;
pub mod resolver;
pub mod tailordb;

use crate::core::types::TypeSourceInfo;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::future::Future;
use std::path::PathBuf;
use tokio::task::JoinSet;

pub use auth::{AuthService, NamespaceBinding};
pub use executor::ExecutorService;
pub use resolver::ResolverService;
pub use tailordb::TailorDbService;

/// Run `load` for every file concurrently and collect the results sorted by path.
///
/// Every task is awaited even after a failure; all failures are reported.
pub(crate) async fn load_concurrently<T, F, Fut>(files: Vec<PathBuf>, load: F) -> Result<Vec<(PathBuf, T)>>
where
    T: Send + 'static,
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for path in files {
        let fut = load(path.clone());
        set.spawn(async move { (path, fut.await) });
    }

    let mut loaded = Vec::new();
    let mut errors = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((path, Ok(value))) => loaded.push((path, value)),
            Ok((_, Err(e))) => errors.push(e),
            Err(e) => errors.push(Error::Config(format!("load task failed: {}", e))),
        }
    }
    Error::collect(errors)?;

    loaded.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(loaded)
}

/// Entities merged into one namespace table, with their provenance.
#[derive(Debug)]
pub(crate) struct Merged<E> {
    pub entities: IndexMap<String, E>,
    pub sources: IndexMap<String, TypeSourceInfo>,
}

/// Merge per-file exports into a namespace table; duplicate names are fatal.
pub(crate) fn merge_exports<E>(
    kind: &'static str,
    namespace: &str,
    per_file: Vec<(PathBuf, Vec<(String, E)>)>,
    name_of: impl Fn(&E) -> &str,
) -> Result<Merged<E>> {
    let mut entities = IndexMap::new();
    let mut sources: IndexMap<String, TypeSourceInfo> = IndexMap::new();
    let mut errors = Vec::new();

    for (path, exports) in per_file {
        for (export_name, entity) in exports {
            let name = name_of(&entity).to_string();
            if let Some(first) = sources.get(&name) {
                errors.push(Error::Duplicate {
                    kind,
                    name,
                    namespace: namespace.to_string(),
                    first: first.file_path.clone(),
                    second: path.clone(),
                });
                continue;
            }
            sources.insert(
                name.clone(),
                TypeSourceInfo {
                    file_path: path.clone(),
                    export_name,
                },
            );
            entities.insert(name, entity);
        }
    }
    Error::collect(errors)?;

    Ok(Merged { entities, sources })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_results_sorted_regardless_of_completion() {
        let files = vec![PathBuf::from("/c"), PathBuf::from("/a"), PathBuf::from("/b")];
        let loaded = load_concurrently(files, |path| async move {
            // Later paths finish first.
            let delay = match path.to_str() {
                Some("/a") => 30,
                Some("/b") => 15,
                _ => 0,
            };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(path.display().to_string())
        })
        .await
        .unwrap();
        let order: Vec<_> = loaded.into_iter().map(|(_, v)| v).collect();
        assert_eq!(order, vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn test_all_failures_reported() {
        let files = vec![PathBuf::from("/x"), PathBuf::from("/y"), PathBuf::from("/ok")];
        let err = load_concurrently(files, |path| async move {
            if path.ends_with("ok") {
                Ok(())
            } else {
                Err(Error::load(path, "bad syntax"))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Multiple(ref v) if v.len() == 2));
    }

    #[test]
    fn test_merge_rejects_duplicates_across_files() {
        let per_file = vec![
            (PathBuf::from("/db/a.yaml"), vec![("default".to_string(), "User".to_string())]),
            (PathBuf::from("/db/b.yaml"), vec![("default".to_string(), "User".to_string())]),
        ];
        let err = merge_exports("type", "main", per_file, |s| s.as_str()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate type 'User' in namespace 'main' (declared in /db/a.yaml and /db/b.yaml)"
        );
    }

    #[test]
    fn test_merge_records_sources() {
        let per_file = vec![(
            PathBuf::from("/db/blog.yaml"),
            vec![
                ("post".to_string(), "Post".to_string()),
                ("comment".to_string(), "Comment".to_string()),
            ],
        )];
        let merged = merge_exports("type", "main", per_file, |s| s.as_str()).unwrap();
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.sources["Comment"].export_name, "comment");
    }
}
