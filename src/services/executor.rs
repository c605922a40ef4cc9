//! Executor service. Executors are project-wide, not namespace-scoped.

use super::{load_concurrently, merge_exports};
use crate::core::discovery;
use crate::core::loader::{ModuleLoader, DEFAULT_EXPORT};
use crate::core::types::{ExecutorDecl, ServiceConfig, TypeSourceInfo};
use crate::error::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Label used for executors in duplicate-declaration errors.
pub const EXECUTOR_SCOPE: &str = "executor";

#[derive(Debug)]
pub struct ExecutorService {
    config: ServiceConfig,
    root_dir: PathBuf,
    loader: Arc<ModuleLoader>,
    loaded: bool,
    executors: IndexMap<String, ExecutorDecl>,
    sources: IndexMap<String, TypeSourceInfo>,
}

impl ExecutorService {
    pub fn new(config: ServiceConfig, root_dir: &Path, loader: Arc<ModuleLoader>) -> Self {
        Self {
            config,
            root_dir: root_dir.to_path_buf(),
            loader,
            loaded: false,
            executors: IndexMap::new(),
            sources: IndexMap::new(),
        }
    }

    pub async fn load_executors(&mut self) -> Result<&IndexMap<String, ExecutorDecl>> {
        if !self.loaded {
            self.load_with_token(None).await?;
        }
        Ok(&self.executors)
    }

    pub async fn reload(&mut self, cache_token: u64) -> Result<&IndexMap<String, ExecutorDecl>> {
        self.loaded = false;
        self.executors.clear();
        self.sources.clear();
        self.load_with_token(Some(cache_token)).await?;
        Ok(&self.executors)
    }

    pub fn get_executors(&self) -> &IndexMap<String, ExecutorDecl> {
        &self.executors
    }

    pub fn sources(&self) -> &IndexMap<String, TypeSourceInfo> {
        &self.sources
    }

    async fn load_with_token(&mut self, cache_token: Option<u64>) -> Result<()> {
        let files = discovery::load_files_with_ignores(&self.root_dir, &self.config).await?;
        let loader = Arc::clone(&self.loader);
        let per_file = load_concurrently(files, move |path| {
            let loader = Arc::clone(&loader);
            async move {
                let executor = loader.load_executor(&path, cache_token).await?;
                Ok(executor
                    .map(|e| vec![(DEFAULT_EXPORT.to_string(), e)])
                    .unwrap_or_default())
            }
        })
        .await?;

        let merged = merge_exports("executor", EXECUTOR_SCOPE, per_file, |e| e.name.as_str())?;
        for (name, executor) in &merged.entities {
            if executor.disabled {
                tracing::info!("executor '{}' is disabled", name);
            }
        }
        self.executors = merged.entities;
        self.sources = merged.sources;
        self.loaded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutorOperation, Trigger};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn service(root: &Path) -> ExecutorService {
        let config: ServiceConfig = serde_yaml_ng::from_str("files: ['executors/*.yaml']").unwrap();
        ExecutorService::new(config, root, Arc::new(ModuleLoader::new()))
    }

    #[tokio::test]
    async fn test_loads_mixed_operation_kinds() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "executors/notify.yaml",
            "name: notify\ntrigger: { kind: record_created, type: User }\noperation: { kind: webhook, url: 'https://example.com/hook' }\n",
        );
        write(
            dir.path(),
            "executors/nightly.yaml",
            "name: nightly\ntrigger: { kind: schedule, cron: '0 0 * * *' }\noperation: { kind: function, body: '() => 1' }\n",
        );
        let mut svc = service(dir.path());
        let executors = svc.load_executors().await.unwrap();
        assert_eq!(executors.keys().collect::<Vec<_>>(), vec!["nightly", "notify"]);
        assert!(matches!(executors["notify"].operation, ExecutorOperation::Webhook { .. }));
        assert!(matches!(
            executors["nightly"].trigger,
            Trigger::Schedule { ref timezone, .. } if timezone == "UTC"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_executor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "name: ping\ntrigger: { kind: incoming_webhook }\noperation: { kind: function }\n";
        write(dir.path(), "executors/a.yaml", doc);
        write(dir.path(), "executors/b.yaml", doc);
        let err = service(dir.path()).load_executors().await.unwrap_err();
        assert!(err.to_string().contains("duplicate executor 'ping'"));
    }
}
