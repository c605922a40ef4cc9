//! Resolver service for one namespace.

use super::{load_concurrently, merge_exports};
use crate::core::discovery;
use crate::core::loader::ModuleLoader;
use crate::core::types::{ResolverDecl, ServiceConfig, TypeSourceInfo};
use crate::error::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct ResolverService {
    namespace: String,
    config: ServiceConfig,
    root_dir: PathBuf,
    loader: Arc<ModuleLoader>,
    loaded: bool,
    resolvers: IndexMap<String, ResolverDecl>,
    sources: IndexMap<String, TypeSourceInfo>,
}

impl ResolverService {
    pub fn new(namespace: &str, config: ServiceConfig, root_dir: &Path, loader: Arc<ModuleLoader>) -> Self {
        Self {
            namespace: namespace.to_string(),
            config,
            root_dir: root_dir.to_path_buf(),
            loader,
            loaded: false,
            resolvers: IndexMap::new(),
            sources: IndexMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn load_resolvers(&mut self) -> Result<&IndexMap<String, ResolverDecl>> {
        if !self.loaded {
            self.load_with_token(None).await?;
        }
        Ok(&self.resolvers)
    }

    pub async fn reload(&mut self, cache_token: u64) -> Result<&IndexMap<String, ResolverDecl>> {
        self.loaded = false;
        self.resolvers.clear();
        self.sources.clear();
        self.load_with_token(Some(cache_token)).await?;
        Ok(&self.resolvers)
    }

    pub fn get_resolvers(&self) -> &IndexMap<String, ResolverDecl> {
        &self.resolvers
    }

    /// Declaring file of each resolver.
    pub fn sources(&self) -> &IndexMap<String, TypeSourceInfo> {
        &self.sources
    }

    async fn load_with_token(&mut self, cache_token: Option<u64>) -> Result<()> {
        let files = discovery::load_files_with_ignores(&self.root_dir, &self.config).await?;
        let loader = Arc::clone(&self.loader);
        let per_file = load_concurrently(files, move |path| {
            let loader = Arc::clone(&loader);
            async move {
                let resolver = loader.load_resolver(&path, cache_token).await?;
                Ok(resolver
                    .map(|r| vec![(crate::core::loader::DEFAULT_EXPORT.to_string(), r)])
                    .unwrap_or_default())
            }
        })
        .await?;

        let merged = merge_exports("resolver", &self.namespace, per_file, |r| r.name.as_str())?;
        self.resolvers = merged.entities;
        self.sources = merged.sources;
        self.loaded = true;
        Ok(())
    }
}
