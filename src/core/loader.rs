//! Declaration module loading with an explicit, token-keyed cache.
//!
//! A module is one YAML source file. Its root document is the default export;
//! a root mapping with an `exports` key instead holds named exports. Parsed
//! modules are cached per path. Passing a cache token forces a fresh read
//! whenever the token differs from the cached one (watch-mode reload).

use super::shapes;
use super::types::{ExecutorDecl, ResolverDecl, TypeDecl};
use crate::core::schema::{format_issues, Schema};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_EXPORT: &str = "default";

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// A cache token no earlier call has returned. Loading with it bypasses
/// whatever is cached.
pub fn fresh_token() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos.wrapping_add(TOKEN_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// A parsed source module.
#[derive(Debug, Clone)]
pub struct Module {
    pub path: PathBuf,
    pub exports: IndexMap<String, Value>,
}

impl Module {
    pub fn default_export(&self) -> Option<&Value> {
        self.exports.get(DEFAULT_EXPORT)
    }
}

#[derive(Debug)]
struct CachedModule {
    token: Option<u64>,
    module: Arc<Module>,
}

/// Loads declaration modules and extracts typed entities from them.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    cache: Mutex<FxHashMap<PathBuf, CachedModule>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a module. `None` reuses any cached parse; `Some(token)` re-reads
    /// unless the cached parse was made with the same token.
    pub async fn load(&self, path: &Path, cache_token: Option<u64>) -> Result<Arc<Module>> {
        if let Some(hit) = self.cached(path, cache_token) {
            return Ok(hit);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::load(path, e))?;
        let module = Arc::new(parse_module(path, &content)?);

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(
            path.to_path_buf(),
            CachedModule {
                token: cache_token,
                module: Arc::clone(&module),
            },
        );
        Ok(module)
    }

    fn cached(&self, path: &Path, cache_token: Option<u64>) -> Option<Arc<Module>> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let entry = cache.get(path)?;
        match cache_token {
            None => Some(Arc::clone(&entry.module)),
            Some(t) if entry.token == Some(t) => Some(Arc::clone(&entry.module)),
            Some(_) => None,
        }
    }

    /// Drop every cached module.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// All exports of `path` that are type declarations, as `(export, type)`.
    pub async fn load_types(
        &self,
        path: &Path,
        cache_token: Option<u64>,
    ) -> Result<Vec<(String, TypeDecl)>> {
        let module = self.load(path, cache_token).await?;
        let mut out = Vec::new();
        for (export, value) in &module.exports {
            if let Some(ty) = extract::<TypeDecl>(path, export, value, shapes::type_shape(), "type")? {
                out.push((export.clone(), ty));
            }
        }
        Ok(out)
    }

    /// The default export of `path` if it is a resolver.
    pub async fn load_resolver(
        &self,
        path: &Path,
        cache_token: Option<u64>,
    ) -> Result<Option<ResolverDecl>> {
        let module = self.load(path, cache_token).await?;
        match module.default_export() {
            Some(value) => extract(path, DEFAULT_EXPORT, value, shapes::resolver_shape(), "resolver"),
            None => Ok(None),
        }
    }

    /// The default export of `path` if it is an executor.
    pub async fn load_executor(
        &self,
        path: &Path,
        cache_token: Option<u64>,
    ) -> Result<Option<ExecutorDecl>> {
        let module = self.load(path, cache_token).await?;
        match module.default_export() {
            Some(value) => extract(path, DEFAULT_EXPORT, value, shapes::executor_shape(), "executor"),
            None => Ok(None),
        }
    }
}

/// Parse module text into its exports.
pub fn parse_module(path: &Path, content: &str) -> Result<Module> {
    let root: Value = serde_yaml_ng::from_str(content).map_err(|e| Error::load(path, e))?;

    let mut exports = IndexMap::new();
    match root {
        Value::Mapping(ref map) if map.contains_key("exports") => {
            let named = match map.get("exports") {
                Some(Value::Mapping(named)) => named,
                _ => return Err(Error::load(path, "'exports' must be a mapping of export name to declaration")),
            };
            for (name, value) in named {
                let name = name
                    .as_str()
                    .ok_or_else(|| Error::load(path, "export names must be strings"))?;
                exports.insert(name.to_string(), value.clone());
            }
        }
        Value::Null => {}
        other => {
            exports.insert(DEFAULT_EXPORT.to_string(), other);
        }
    }

    Ok(Module {
        path: path.to_path_buf(),
        exports,
    })
}

fn extract<T: DeserializeOwned + HasName>(
    path: &Path,
    export: &str,
    value: &Value,
    shape: &Schema,
    kind: &str,
) -> Result<Option<T>> {
    let normalized = match shape.validate(value) {
        Ok(v) => v,
        Err(issues) => {
            tracing::debug!(
                "{} export '{}' is not a {}:\n{}",
                path.display(),
                export,
                kind,
                format_issues(&issues)
            );
            return Ok(None);
        }
    };
    let entity: T = serde_yaml_ng::from_value(normalized)
        .map_err(|e| Error::load(path, format!("export '{}': {}", export, e)))?;
    tracing::info!("loaded {} '{}' from {}", kind, entity.name(), path.display());
    Ok(Some(entity))
}

/// Entities that carry a declared name.
pub trait HasName {
    fn name(&self) -> &str;
}

impl HasName for TypeDecl {
    fn name(&self) -> &str {
        &self.name
    }
}

impl HasName for ResolverDecl {
    fn name(&self) -> &str {
        &self.name
    }
}

impl HasName for ExecutorDecl {
    fn name(&self) -> &str {
        &self.name
    }
}
