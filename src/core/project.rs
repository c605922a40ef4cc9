//! Whole-project loading and the immutable graph handed to later stages.
//!
//! A [`Project`] owns every service of every application. `load` runs the
//! per-application services concurrently, then binds auth namespaces, then
//! checks cross-entity references. [`ProjectGraph`] is a read-only snapshot
//! of the result that generators, the bundler and the platform planner use.

use super::discovery;
use super::loader::ModuleLoader;
use super::parser;
use super::types::{
    ExecutorDecl, FunctionBody, ParsedType, ResolverDecl, RootConfig, ServiceConfig, Trigger,
    TypeSourceInfo,
};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::plugins::PluginManager;
use crate::services::{AuthService, ExecutorService, NamespaceBinding, ResolverService, TailorDbService};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One application and its services.
#[derive(Debug)]
pub struct Application {
    pub name: String,
    pub db: Vec<TailorDbService>,
    pub resolvers: Vec<ResolverService>,
    pub auth: Option<AuthService>,
}

#[derive(Debug)]
pub struct Project {
    pub config: RootConfig,
    pub ctx: BuildContext,
    pub applications: Vec<Application>,
    pub executors: Option<ExecutorService>,
    loader: Arc<ModuleLoader>,
}

impl Project {
    pub fn new(config: RootConfig, ctx: BuildContext, plugins: Arc<PluginManager>) -> Self {
        let loader = Arc::new(ModuleLoader::new());
        let root = ctx.root_dir.clone();

        let applications = config
            .applications
            .iter()
            .map(|app| Application {
                name: app.name.clone(),
                db: app
                    .db
                    .iter()
                    .map(|(ns, db)| {
                        TailorDbService::new(ns, db.clone(), &root, Arc::clone(&loader), Arc::clone(&plugins))
                    })
                    .collect(),
                resolvers: app
                    .resolver
                    .iter()
                    .map(|(ns, cfg)| ResolverService::new(ns, cfg.clone(), &root, Arc::clone(&loader)))
                    .collect(),
                auth: app.auth.clone().map(AuthService::new),
            })
            .collect();

        let executors = config
            .executor
            .clone()
            .map(|cfg| ExecutorService::new(cfg, &root, Arc::clone(&loader)));

        Self {
            config,
            ctx,
            applications,
            executors,
            loader,
        }
    }

    /// Parse and validate the root config at `config_path`, then build the project.
    pub fn open(
        config_path: &Path,
        output_override: Option<&Path>,
        known_generators: &[&str],
        plugins: Arc<PluginManager>,
    ) -> Result<Self> {
        let config = parser::parse_config_file(config_path)?;
        let errors = parser::validate_config(&config, known_generators);
        if !errors.is_empty() {
            return Err(Error::Config(format!(
                "{} has {} validation error(s):\n{}",
                config_path.display(),
                errors.len(),
                errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n")
            )));
        }

        let root = match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let root = std::path::absolute(&root).map_err(|e| Error::io(&root, e))?;
        let ctx = BuildContext::resolve(&root, &config, output_override);
        Ok(Self::new(config, ctx, plugins))
    }

    /// Load every service, bind auth namespaces and check references.
    pub async fn load(&mut self) -> Result<()> {
        self.load_services(None).await?;
        self.resolve_auth().await?;
        self.check_references()
    }

    /// Reload every service with a fresh cache token (watch mode).
    pub async fn reload(&mut self, cache_token: u64) -> Result<()> {
        for app in &mut self.applications {
            app.auth = app.auth.take().map(|a| AuthService::new(a.config().clone()));
        }
        self.load_services(Some(cache_token)).await?;
        self.resolve_auth().await?;
        self.check_references()
    }

    async fn load_services(&mut self, cache_token: Option<u64>) -> Result<()> {
        for app in &mut self.applications {
            let db = futures::future::try_join_all(app.db.iter_mut().map(|svc| async move {
                match cache_token {
                    Some(token) => svc.reload(token).await.map(|_| ()),
                    None => svc.load_types().await.map(|_| ()),
                }
            }));
            let resolvers = futures::future::try_join_all(app.resolvers.iter_mut().map(|svc| async move {
                match cache_token {
                    Some(token) => svc.reload(token).await.map(|_| ()),
                    None => svc.load_resolvers().await.map(|_| ()),
                }
            }));
            futures::try_join!(db, resolvers)?;
            tracing::info!(
                "application '{}': {} type(s), {} resolver(s)",
                app.name,
                app.db.iter().map(|s| s.get_types().len()).sum::<usize>(),
                app.resolvers.iter().map(|s| s.get_resolvers().len()).sum::<usize>()
            );
        }

        if let Some(executors) = &mut self.executors {
            match cache_token {
                Some(token) => executors.reload(token).await?,
                None => executors.load_executors().await?,
            };
        }
        Ok(())
    }

    async fn resolve_auth(&mut self) -> Result<()> {
        for app in &mut self.applications {
            if let Some(auth) = &mut app.auth {
                if !auth.is_resolved() {
                    auth.resolve_namespaces(&mut app.db).await?;
                }
                auth.validate_bindings(&app.db)?;
            }
        }
        Ok(())
    }

    /// Executor triggers, file-based and plugin-produced, must name loaded
    /// types and resolvers.
    fn check_references(&self) -> Result<()> {
        let mut types = BTreeSet::new();
        let mut resolvers = BTreeSet::new();
        let mut has_external = false;
        let mut executors: Vec<(&str, &ExecutorDecl, PathBuf)> = Vec::new();
        for app in &self.applications {
            for db in &app.db {
                has_external |= db.is_external();
                types.extend(db.get_types().keys().map(String::as_str));
                resolvers.extend(db.plugin_resolvers().iter().map(|g| g.entity.name.as_str()));
                for generated in db.plugin_executors() {
                    let path = host_path(db, &generated.host_type);
                    executors.push((generated.entity.name.as_str(), &generated.entity, path));
                }
            }
            for svc in &app.resolvers {
                resolvers.extend(svc.get_resolvers().keys().map(String::as_str));
            }
        }
        if let Some(svc) = &self.executors {
            for (name, executor) in svc.get_executors() {
                let path = svc.sources().get(name).map(|s| s.file_path.clone()).unwrap_or_default();
                executors.push((name.as_str(), executor, path));
            }
        }

        let mut errors = Vec::new();
        for (name, executor, path) in executors {
            let path = path.display();
            match &executor.trigger {
                Trigger::RecordCreated { type_name, .. }
                | Trigger::RecordUpdated { type_name, .. }
                | Trigger::RecordDeleted { type_name, .. } => {
                    if !has_external && !types.contains(type_name.as_str()) {
                        errors.push(Error::Config(format!(
                            "executor '{}' ({}) triggers on unknown type '{}'",
                            name, path, type_name
                        )));
                    }
                }
                Trigger::ResolverExecuted { resolver } => {
                    if !resolvers.contains(resolver.as_str()) {
                        errors.push(Error::Config(format!(
                            "executor '{}' ({}) triggers on unknown resolver '{}'",
                            name, path, resolver
                        )));
                    }
                }
                Trigger::Schedule { .. } | Trigger::IncomingWebhook => {}
            }
        }
        Error::collect(errors)
    }

    /// Every file currently matched by a configured service, plus the JS
    /// files that loaded resolvers and executors take their bodies from.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let root = &self.ctx.root_dir;
        let mut configs: Vec<ServiceConfig> = Vec::new();
        for app in &self.config.applications {
            configs.extend(app.db.values().filter(|d| !d.external).map(|d| d.service_config()));
            configs.extend(app.resolver.values().cloned());
        }
        configs.extend(self.config.executor.clone());

        let mut files: BTreeSet<PathBuf> = configs
            .iter()
            .flat_map(|cfg| discovery::discover(root, cfg))
            .collect();
        for app in &self.applications {
            for svc in &app.resolvers {
                files.extend(
                    svc.get_resolvers()
                        .iter()
                        .filter_map(|(name, r)| body_file(r.body.as_ref(), svc.sources().get(name))),
                );
            }
        }
        if let Some(svc) = &self.executors {
            files.extend(svc.get_executors().iter().filter_map(|(name, e)| {
                body_file(e.operation.function_body().flatten(), svc.sources().get(name))
            }));
        }
        files.into_iter().collect()
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    /// Snapshot the loaded project. Plugin-produced resolvers join the resolver
    /// namespace named after their db namespace; plugin executors join the
    /// project executors. Name clashes are fatal.
    pub fn graph(&self) -> Result<ProjectGraph> {
        let mut applications = Vec::new();
        for app in &self.applications {
            let db: Vec<DbNamespaceGraph> = app
                .db
                .iter()
                .map(|svc| DbNamespaceGraph {
                    name: svc.namespace().to_string(),
                    external: svc.is_external(),
                    types: svc.get_types().clone(),
                    type_order: svc.type_order().to_vec(),
                    sources: svc.type_source_info().clone(),
                })
                .collect();

            let mut resolvers: Vec<ResolverNamespaceGraph> = app
                .resolvers
                .iter()
                .map(|svc| ResolverNamespaceGraph {
                    name: svc.namespace().to_string(),
                    resolvers: svc.get_resolvers().clone(),
                    sources: svc.sources().clone(),
                })
                .collect();

            for svc in &app.db {
                for generated in svc.plugin_resolvers() {
                    let idx = match resolvers.iter().position(|r| r.name == svc.namespace()) {
                        Some(i) => i,
                        None => {
                            resolvers.push(ResolverNamespaceGraph {
                                name: svc.namespace().to_string(),
                                resolvers: IndexMap::new(),
                                sources: IndexMap::new(),
                            });
                            resolvers.len() - 1
                        }
                    };
                    let target = &mut resolvers[idx];
                    let name = &generated.entity.name;
                    if target.resolvers.contains_key(name) {
                        return Err(Error::Duplicate {
                            kind: "resolver",
                            name: name.clone(),
                            namespace: target.name.clone(),
                            first: target.sources.get(name).map(|s| s.file_path.clone()).unwrap_or_default(),
                            second: host_path(svc, &generated.host_type),
                        });
                    }
                    target.resolvers.insert(name.clone(), generated.entity.clone());
                }
            }

            let auth = match &app.auth {
                Some(auth) => Some(AuthGraph {
                    name: auth.config().name.clone(),
                    user_profile: auth.user_profile()?.clone(),
                    username_field: auth.config().user_profile.username_field.clone(),
                    tenant_provider: auth.tenant_provider()?.cloned(),
                }),
                None => None,
            };

            applications.push(ApplicationGraph {
                name: app.name.clone(),
                db,
                resolvers,
                auth,
            });
        }

        let mut executors = IndexMap::new();
        let mut executor_sources = IndexMap::new();
        if let Some(svc) = &self.executors {
            executors = svc.get_executors().clone();
            executor_sources = svc.sources().clone();
        }
        // host file of each plugin executor already merged
        let mut plugin_hosts: IndexMap<String, PathBuf> = IndexMap::new();
        for app in &self.applications {
            for db in &app.db {
                for generated in db.plugin_executors() {
                    let name = &generated.entity.name;
                    let host = host_path(db, &generated.host_type);
                    if executors.contains_key(name) {
                        let first = executor_sources
                            .get(name)
                            .map(|s| s.file_path.clone())
                            .or_else(|| plugin_hosts.get(name).cloned())
                            .unwrap_or_default();
                        return Err(Error::Duplicate {
                            kind: "executor",
                            name: name.clone(),
                            namespace: crate::services::executor::EXECUTOR_SCOPE.to_string(),
                            first,
                            second: host,
                        });
                    }
                    plugin_hosts.insert(name.clone(), host);
                    executors.insert(name.clone(), generated.entity.clone());
                }
            }
        }

        Ok(ProjectGraph {
            name: self.config.name.clone(),
            applications,
            executors,
            executor_sources,
        })
    }
}

/// Module body path, relative to the declaring file.
fn body_file(body: Option<&FunctionBody>, source: Option<&TypeSourceInfo>) -> Option<PathBuf> {
    match (body?, source?) {
        (FunctionBody::Module { file, .. }, source) => source.file_path.parent().map(|dir| dir.join(file)),
        (FunctionBody::Inline(_), _) => None,
    }
}

fn host_path(db: &TailorDbService, host_type: &str) -> PathBuf {
    db.type_source_info()
        .get(host_type)
        .map(|s| s.file_path.clone())
        .unwrap_or_default()
}

/// Read-only snapshot of a loaded project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectGraph {
    pub name: String,
    pub applications: Vec<ApplicationGraph>,
    pub executors: IndexMap<String, ExecutorDecl>,
    /// Declaring file of each file-based executor
    #[serde(skip)]
    pub executor_sources: IndexMap<String, TypeSourceInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationGraph {
    pub name: String,
    pub db: Vec<DbNamespaceGraph>,
    pub resolvers: Vec<ResolverNamespaceGraph>,
    pub auth: Option<AuthGraph>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbNamespaceGraph {
    pub name: String,
    pub external: bool,
    pub types: IndexMap<String, ParsedType>,
    /// Type names, foreign-key targets first
    pub type_order: Vec<String>,
    #[serde(skip)]
    pub sources: IndexMap<String, TypeSourceInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverNamespaceGraph {
    pub name: String,
    pub resolvers: IndexMap<String, ResolverDecl>,
    /// Declaring file of each file-based resolver
    #[serde(skip)]
    pub sources: IndexMap<String, TypeSourceInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthGraph {
    pub name: String,
    pub user_profile: NamespaceBinding,
    pub username_field: String,
    pub tenant_provider: Option<NamespaceBinding>,
}

impl ProjectGraph {
    pub fn type_count(&self) -> usize {
        self.applications
            .iter()
            .flat_map(|a| &a.db)
            .map(|d| d.types.len())
            .sum()
    }

    pub fn resolver_count(&self) -> usize {
        self.applications
            .iter()
            .flat_map(|a| &a.resolvers)
            .map(|r| r.resolvers.len())
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A small two-application project on disk, shared by pipeline tests.

    use std::path::Path;

    pub const CONFIG: &str = r#"
name: shop
env:
  STAGE: test
applications:
  - name: storefront
    db:
      main:
        files: ["db/**/*.yaml"]
      analytics:
        files: ["analytics/*.yaml"]
    resolver:
      main:
        files: ["resolvers/*.yaml"]
    auth:
      name: shop-auth
      user_profile: { type: User, username_field: email }
executor:
  files: ["executors/*.yaml"]
"#;

    pub fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Write the fixture project under `root` and return the config path.
    pub fn project(root: &Path) -> std::path::PathBuf {
        write(root, "tailor.config.yaml", CONFIG);
        write(
            root,
            "db/user.yaml",
            "name: User\ntimestamps: true\nfields:\n  email: { type: string, unique: true }\n  role: { type: enum, values: [admin, member] }\n",
        );
        write(
            root,
            "db/order.yaml",
            "name: Order\nfields:\n  total: { type: float }\n  userId: { type: uuid, foreign_key: { type: User } }\n  shipping:\n    type: nested\n    fields:\n      city: { type: string }\n      zip: { type: string, required: false }\nplugins:\n  - [changeset, { enable: true }]\n",
        );
        write(root, "db/order.test.yaml", "name: Ignored\nfields: {}\n");
        write(root, "analytics/event.yaml", "name: Event\nfields:\n  kind: { type: string }\n");
        write(
            root,
            "resolvers/add.yaml",
            "name: add\noperation: query\ninput:\n  a: { type: integer }\n  b: { type: integer }\noutput: { type: integer }\nbody: \"({ input }) => input.a + input.b\"\n",
        );
        write(
            root,
            "resolvers/orders.yaml",
            "name: ordersByUser\noperation: query\ninput:\n  userId: { type: uuid }\noutput: { type: string, array: true }\ndb_namespace: main\nbody: { file: ./orders.js, export: ordersByUser }\n",
        );
        write(
            root,
            "resolvers/orders.js",
            "export async function ordersByUser({ input, db }) {\n  return db('main').query('select id from \"Order\" where \"userId\" = $1', [input.userId]);\n}\n",
        );
        write(
            root,
            "executors/notify.yaml",
            "name: notify-order\ntrigger: { kind: record_created, type: Order }\noperation: { kind: webhook, url: 'https://hooks.example.com/order' }\n",
        );
        write(
            root,
            "executors/cleanup.yaml",
            "name: nightly-cleanup\ntrigger: { kind: schedule, cron: '0 3 * * *' }\noperation: { kind: function, body: 'async ({ env }) => env.STAGE' }\n",
        );
        root.join("tailor.config.yaml")
    }
}
