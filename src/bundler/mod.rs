//! Function bundling: turns resolver and executor bodies into deployable units.
//!
//! For every function-kind entity the transformer writes two files into a
//! staging dir:
//! - `<name>.js`: the body (original source or inline expression) plus a
//!   wrapped export that injects a frozen `env` and a `db(namespace)` accessor
//! - `<name>.entry.js`: imports only the wrapped export and assigns it to the
//!   global entry point
//!
//! [`bundle`] stages every function of a project under
//! `<output>/functions/` and records entry points with blake3 hashes in
//! `bundle.json`.

use crate::context::BuildContext;
use crate::core::hasher;
use crate::core::loader::{fresh_token, ModuleLoader};
use crate::core::output::{contained_join, write_atomic};
use crate::core::project::ProjectGraph;
use crate::core::types::{FunctionBody, ResolverDecl};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global the platform runtime calls.
pub const ENTRY_GLOBAL: &str = "main";
const WRAPPED_EXPORT: &str = "$tailor_main";
pub const MANIFEST_FILE: &str = "bundle.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Resolver,
    Executor,
}

/// One function ready for packaging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    pub kind: FunctionKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Entry file, relative to the functions dir
    pub entry: PathBuf,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleManifest {
    pub functions: Vec<BundleEntry>,
}

impl BundleManifest {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::load(path, e))
    }

    pub fn find(&self, kind: FunctionKind, name: &str) -> Option<&BundleEntry> {
        self.functions.iter().find(|f| f.kind == kind && f.name == name)
    }
}

/// Wraps function bodies with frozen environment and db access.
#[derive(Debug, Clone)]
pub struct Transformer {
    loader: Arc<ModuleLoader>,
    env: IndexMap<String, String>,
}

impl Transformer {
    pub fn new(loader: Arc<ModuleLoader>, env: IndexMap<String, String>) -> Self {
        Self { loader, env }
    }

    /// Transform the resolver declared in `path`, reloading it from disk.
    pub async fn transform_resolver(&self, path: &Path, temp_dir: &Path) -> Result<Vec<PathBuf>> {
        let resolver = self
            .loader
            .load_resolver(path, Some(fresh_token()))
            .await?
            .ok_or_else(|| Error::load(path, "not a resolver declaration"))?;
        self.transform_resolver_decl(&resolver, declaring_dir(path), temp_dir)
    }

    /// Transform the executor declared in `path`, reloading it from disk.
    /// Non-function operations produce no files.
    pub async fn transform_executor(&self, path: &Path, temp_dir: &Path) -> Result<Vec<PathBuf>> {
        let executor = self
            .loader
            .load_executor(path, Some(fresh_token()))
            .await?
            .ok_or_else(|| Error::load(path, "not an executor declaration"))?;
        match executor.operation.function_body() {
            None => {
                tracing::debug!(
                    "executor '{}' ({}) has nothing to bundle",
                    executor.name,
                    executor.operation.kind()
                );
                Ok(Vec::new())
            }
            Some(body) => self.transform_body(&executor.name, body, None, declaring_dir(path), temp_dir),
        }
    }

    pub fn transform_resolver_decl(
        &self,
        resolver: &ResolverDecl,
        base_dir: &Path,
        temp_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.transform_body(
            &resolver.name,
            resolver.body.as_ref(),
            resolver.db_namespace.as_deref(),
            base_dir,
            temp_dir,
        )
    }

    /// Write the wrapper and entry files for one function body.
    pub fn transform_body(
        &self,
        name: &str,
        body: Option<&FunctionBody>,
        db_namespace: Option<&str>,
        base_dir: &Path,
        temp_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let body = body.ok_or_else(|| Error::Bundle {
            name: name.to_string(),
            message: "function operation has no body".to_string(),
        })?;

        let (source, function) = match body {
            FunctionBody::Inline(expr) => (
                format!("const __tailor_body = (\n{}\n);\n", expr.trim()),
                "__tailor_body".to_string(),
            ),
            FunctionBody::Module { file, export } => {
                let path = base_dir.join(file);
                let text = std::fs::read_to_string(&path).map_err(|e| Error::Bundle {
                    name: name.to_string(),
                    message: format!("cannot read {}: {}", path.display(), e),
                })?;
                (text, export.clone())
            }
        };

        let wrapper_name = format!("{}.js", name);
        let entry_name = format!("{}.entry.js", name);
        let wrapper_path = contained_join(temp_dir, Path::new(&wrapper_name))
            .map_err(|message| Error::Bundle { name: name.to_string(), message })?;
        let entry_path = contained_join(temp_dir, Path::new(&entry_name))
            .map_err(|message| Error::Bundle { name: name.to_string(), message })?;

        let wrapper = format!(
            "{source}\n{appendix}",
            source = source.trim_end(),
            appendix = self.wrapped_export(&function, db_namespace)?
        );
        let entry = format!(
            "import {{ {export} }} from \"./{wrapper}\";\n\nglobalThis.{global} = {export};\n",
            export = WRAPPED_EXPORT,
            wrapper = wrapper_name,
            global = ENTRY_GLOBAL,
        );

        write_atomic(&wrapper_path, wrapper.as_bytes())?;
        write_atomic(&entry_path, entry.as_bytes())?;
        tracing::debug!("transformed '{}' into {}", name, temp_dir.display());
        Ok(vec![wrapper_path, entry_path])
    }

    fn wrapped_export(&self, function: &str, db_namespace: Option<&str>) -> Result<String> {
        let env = serde_json::to_string(&self.env)
            .map_err(|e| Error::Config(format!("cannot serialize env: {}", e)))?;
        let default_ns = match db_namespace {
            Some(ns) => format!(
                " = {}",
                serde_json::to_string(ns).map_err(|e| Error::Config(e.to_string()))?
            ),
            None => String::new(),
        };
        Ok(format!(
            "\n// tailor-sdk wrapper\n\
             const __tailor_env = Object.freeze({env});\n\
             const __tailor_db = (namespace{default_ns}) => new tailordb.Client({{ namespace }});\n\
             export const {wrapped} = (args) => {function}({{ ...args, env: __tailor_env, db: __tailor_db }});\n",
            env = env,
            default_ns = default_ns,
            wrapped = WRAPPED_EXPORT,
            function = function,
        ))
    }
}

fn declaring_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

/// Stage every function of the project under `<output>/functions/` and write
/// the bundle manifest. The functions dir is rebuilt from scratch.
pub async fn bundle(graph: &ProjectGraph, ctx: &BuildContext, loader: Arc<ModuleLoader>) -> Result<BundleManifest> {
    let functions_dir = ctx.functions_dir();
    if functions_dir.exists() {
        std::fs::remove_dir_all(&functions_dir).map_err(|e| Error::io(&functions_dir, e))?;
    }
    let transformer = Transformer::new(loader, ctx.env.clone());
    let mut manifest = BundleManifest::default();
    let mut errors = Vec::new();

    for app in &graph.applications {
        for ns in &app.resolvers {
            let rel_dir = PathBuf::from("resolvers").join(&app.name).join(&ns.name);
            let temp_dir = functions_dir.join(&rel_dir);
            for (name, resolver) in &ns.resolvers {
                let produced = match ns.sources.get(name) {
                    Some(source) => transformer.transform_resolver(&source.file_path, &temp_dir).await,
                    None => transformer.transform_resolver_decl(resolver, &ctx.root_dir, &temp_dir),
                };
                match produced {
                    Ok(files) => manifest.functions.push(entry_for(
                        FunctionKind::Resolver,
                        name,
                        Some((&app.name, &ns.name)),
                        &rel_dir,
                        &files,
                    )?),
                    Err(e) => errors.push(e),
                }
            }
        }
    }

    let rel_dir = PathBuf::from("executors");
    let temp_dir = functions_dir.join(&rel_dir);
    for (name, executor) in &graph.executors {
        if executor.disabled {
            continue;
        }
        let produced = match graph.executor_sources.get(name) {
            Some(source) => transformer.transform_executor(&source.file_path, &temp_dir).await,
            None => match executor.operation.function_body() {
                Some(body) => transformer.transform_body(name, body, None, &ctx.root_dir, &temp_dir),
                None => Ok(Vec::new()),
            },
        };
        match produced {
            Ok(files) if files.is_empty() => {}
            Ok(files) => manifest
                .functions
                .push(entry_for(FunctionKind::Executor, name, None, &rel_dir, &files)?),
            Err(e) => errors.push(e),
        }
    }
    Error::collect(errors)?;

    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| Error::Config(format!("cannot serialize bundle manifest: {}", e)))?;
    write_atomic(&functions_dir.join(MANIFEST_FILE), json.as_bytes())?;
    tracing::info!(
        "bundled {} function(s) into {}",
        manifest.functions.len(),
        functions_dir.display()
    );
    Ok(manifest)
}

fn entry_for(
    kind: FunctionKind,
    name: &str,
    scope: Option<(&str, &str)>,
    rel_dir: &Path,
    files: &[PathBuf],
) -> Result<BundleEntry> {
    let mut hashes = Vec::new();
    for file in files {
        hashes.push(hasher::hash_file(file)?);
    }
    let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
    Ok(BundleEntry {
        kind,
        name: name.to_string(),
        application: scope.map(|(app, _)| app.to_string()),
        namespace: scope.map(|(_, ns)| ns.to_string()),
        entry: rel_dir.join(format!("{}.entry.js", name)),
        hash: hasher::composite_hash(&refs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::test_support::fixture_graph;
    use crate::core::project::fixtures;

    fn transformer() -> Transformer {
        let mut env = IndexMap::new();
        env.insert("STAGE".to_string(), "test".to_string());
        Transformer::new(Arc::new(ModuleLoader::new()), env)
    }

    #[tokio::test]
    async fn test_webhook_executor_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write(
            dir.path(),
            "hook.yaml",
            "name: hook\ntrigger: { kind: incoming_webhook }\noperation: { kind: webhook, url: 'https://example.com' }\n",
        );
        let out = tempfile::tempdir().unwrap();
        let files = transformer()
            .transform_executor(&dir.path().join("hook.yaml"), out.path())
            .await
            .unwrap();
        assert!(files.is_empty());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_function_executor_without_body_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write(
            dir.path(),
            "job.yaml",
            "name: reindex\ntrigger: { kind: schedule, cron: '* * * * *' }\noperation: { kind: job_function }\n",
        );
        let out = tempfile::tempdir().unwrap();
        let err = transformer()
            .transform_executor(&dir.path().join("job.yaml"), out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bundle { ref name, .. } if name == "reindex"));
        assert!(err.to_string().contains("reindex"));
    }

    #[tokio::test]
    async fn test_inline_body_wrapped_with_env() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write(
            dir.path(),
            "nightly.yaml",
            "name: nightly\ntrigger: { kind: schedule, cron: '0 0 * * *' }\noperation: { kind: function, body: 'async ({ env }) => env.STAGE' }\n",
        );
        let out = tempfile::tempdir().unwrap();
        let files = transformer()
            .transform_executor(&dir.path().join("nightly.yaml"), out.path())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);

        let wrapper = std::fs::read_to_string(&files[0]).unwrap();
        assert!(wrapper.starts_with("const __tailor_body = (\nasync ({ env }) => env.STAGE\n);"));
        assert!(wrapper.contains("Object.freeze({\"STAGE\":\"test\"})"));
        assert!(wrapper.contains("export const $tailor_main = (args) => __tailor_body("));

        let entry = std::fs::read_to_string(&files[1]).unwrap();
        assert_eq!(
            entry,
            "import { $tailor_main } from \"./nightly.js\";\n\nglobalThis.main = $tailor_main;\n"
        );
    }

    #[tokio::test]
    async fn test_module_body_keeps_source_and_default_namespace() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::project(dir.path());
        let out = tempfile::tempdir().unwrap();
        let files = transformer()
            .transform_resolver(&dir.path().join("resolvers/orders.yaml"), out.path())
            .await
            .unwrap();
        let wrapper = std::fs::read_to_string(&files[0]).unwrap();
        assert!(wrapper.starts_with("export async function ordersByUser"));
        assert!(wrapper.contains("const __tailor_db = (namespace = \"main\") => new tailordb.Client({ namespace });"));
        assert!(wrapper.contains("=> ordersByUser({ ...args"));
    }

    #[tokio::test]
    async fn test_transform_reads_fresh_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.yaml");
        let loader = Arc::new(ModuleLoader::new());
        let transformer = Transformer::new(Arc::clone(&loader), IndexMap::new());

        std::fs::write(&path, "name: hello\noperation: query\noutput: { type: string }\nbody: \"() => 'a'\"\n").unwrap();
        loader.load_resolver(&path, None).await.unwrap();
        std::fs::write(&path, "name: hello\noperation: query\noutput: { type: string }\nbody: \"() => 'b'\"\n").unwrap();

        let out = tempfile::tempdir().unwrap();
        let files = transformer.transform_resolver(&path, out.path()).await.unwrap();
        assert!(std::fs::read_to_string(&files[0]).unwrap().contains("() => 'b'"));
    }

    #[tokio::test]
    async fn test_bundle_stages_project() {
        let dir = tempfile::tempdir().unwrap();
        let graph = fixture_graph(dir.path()).await;
        let ctx = BuildContext::new(dir.path(), &dir.path().join(".tailor-sdk"));
        let stale = ctx.functions_dir().join("stale.js");
        fixtures::write(dir.path(), ".tailor-sdk/functions/stale.js", "old");

        let manifest = bundle(&graph, &ctx, Arc::new(ModuleLoader::new())).await.unwrap();
        assert!(!stale.exists());

        // webhook executor has no bundle entry
        assert_eq!(manifest.functions.len(), 3);
        let add = manifest.find(FunctionKind::Resolver, "add").unwrap();
        assert_eq!(add.entry, PathBuf::from("resolvers/storefront/main/add.entry.js"));
        assert!(add.hash.starts_with("blake3:"));
        assert!(manifest.find(FunctionKind::Executor, "notify-order").is_none());
        assert!(ctx.functions_dir().join("executors/nightly-cleanup.js").exists());

        let reread = BundleManifest::load(&ctx.functions_dir().join(MANIFEST_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(reread, manifest);
    }
}
