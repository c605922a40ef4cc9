//! Database type service for one namespace.
//!
//! Loading is two passes. The first loads every file and merges the raw
//! declarations. The second (`parse_types`) adds implicit fields, expands
//! plugin attachments, then resolves relations across files and computes the
//! foreign-key creation order.

use super::{load_concurrently, merge_exports};
use crate::core::discovery;
use crate::core::loader::ModuleLoader;
use crate::core::resolver::{build_type_order, resolve_relations};
use crate::core::types::{
    DbNamespaceConfig, ExecutorDecl, FieldDecl, FieldType, ParsedType, PluginAttachment,
    ResolverDecl, TypeDecl, TypeSourceInfo,
};
use crate::error::{Error, Result};
use crate::plugins::{AttachmentRequest, PluginManager};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A plugin-produced resolver or executor and the type that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub plugin: String,
    pub host_type: String,
    pub entity: T,
}

#[derive(Debug)]
pub struct TailorDbService {
    namespace: String,
    config: DbNamespaceConfig,
    root_dir: PathBuf,
    loader: Arc<ModuleLoader>,
    plugins: Arc<PluginManager>,
    loaded: bool,
    types: IndexMap<String, ParsedType>,
    sources: IndexMap<String, TypeSourceInfo>,
    type_order: Vec<String>,
    plugin_resolvers: Vec<Generated<ResolverDecl>>,
    plugin_executors: Vec<Generated<ExecutorDecl>>,
}

impl TailorDbService {
    pub fn new(
        namespace: &str,
        config: DbNamespaceConfig,
        root_dir: &Path,
        loader: Arc<ModuleLoader>,
        plugins: Arc<PluginManager>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            config,
            root_dir: root_dir.to_path_buf(),
            loader,
            plugins,
            loaded: false,
            types: IndexMap::new(),
            sources: IndexMap::new(),
            type_order: Vec::new(),
            plugin_resolvers: Vec::new(),
            plugin_executors: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declared in another application; never loaded.
    pub fn is_external(&self) -> bool {
        self.config.external
    }

    /// Load and parse the namespace. Returns the cached table when already loaded.
    pub async fn load_types(&mut self) -> Result<&IndexMap<String, ParsedType>> {
        if !self.loaded {
            self.load_with_token(None).await?;
        }
        Ok(&self.types)
    }

    /// Discard the table and load again, bypassing the module cache.
    pub async fn reload(&mut self, cache_token: u64) -> Result<&IndexMap<String, ParsedType>> {
        self.clear();
        self.load_with_token(Some(cache_token)).await?;
        Ok(&self.types)
    }

    /// Parsed types; empty until loaded.
    pub fn get_types(&self) -> &IndexMap<String, ParsedType> {
        &self.types
    }

    pub fn type_source_info(&self) -> &IndexMap<String, TypeSourceInfo> {
        &self.sources
    }

    /// Type names ordered so foreign-key targets come first.
    pub fn type_order(&self) -> &[String] {
        &self.type_order
    }

    pub fn plugin_resolvers(&self) -> &[Generated<ResolverDecl>] {
        &self.plugin_resolvers
    }

    pub fn plugin_executors(&self) -> &[Generated<ExecutorDecl>] {
        &self.plugin_executors
    }

    fn clear(&mut self) {
        self.loaded = false;
        self.types.clear();
        self.sources.clear();
        self.type_order.clear();
        self.plugin_resolvers.clear();
        self.plugin_executors.clear();
    }

    async fn load_with_token(&mut self, cache_token: Option<u64>) -> Result<()> {
        if self.config.external {
            self.loaded = true;
            return Ok(());
        }

        let files =
            discovery::load_files_with_ignores(&self.root_dir, &self.config.service_config()).await?;
        tracing::debug!(
            "db namespace '{}': {} source file(s)",
            self.namespace,
            files.len()
        );

        let loader = Arc::clone(&self.loader);
        let per_file = load_concurrently(files, move |path| {
            let loader = Arc::clone(&loader);
            async move { loader.load_types(&path, cache_token).await }
        })
        .await?;

        let merged = merge_exports("type", &self.namespace, per_file, |t| t.name.as_str())?;
        self.parse_types(merged.entities, merged.sources).await?;
        self.loaded = true;
        Ok(())
    }

    /// Second pass over the merged declarations of the whole namespace.
    async fn parse_types(
        &mut self,
        raw: IndexMap<String, TypeDecl>,
        mut sources: IndexMap<String, TypeSourceInfo>,
    ) -> Result<()> {
        let mut types: IndexMap<String, ParsedType> = IndexMap::new();
        let mut generated: Vec<(String, ParsedType)> = Vec::new();
        let mut resolvers = Vec::new();
        let mut executors = Vec::new();

        for (name, decl) in raw {
            let mut host = with_implicit_fields(decl.clone());

            for attachment in self.effective_attachments(&decl) {
                let output = self
                    .plugins
                    .process_attachment(AttachmentRequest {
                        type_decl: &decl,
                        attachment: &attachment,
                        namespace: &self.namespace,
                    })
                    .await?;

                for (field_name, field) in output.extends {
                    if host.fields.contains_key(&field_name) {
                        return Err(Error::Plugin {
                            plugin: attachment.id().to_string(),
                            type_name: name.clone(),
                            message: format!("extension field '{}' is already declared", field_name),
                        });
                    }
                    host.fields.insert(field_name, field);
                }
                for ty in output.types {
                    generated.push((
                        name.clone(),
                        ParsedType {
                            decl: with_implicit_fields(ty),
                            relations: Vec::new(),
                            back_relations: Vec::new(),
                            generated_by: Some(attachment.id().to_string()),
                        },
                    ));
                }
                resolvers.extend(output.resolvers.into_iter().map(|entity| Generated {
                    plugin: attachment.id().to_string(),
                    host_type: name.clone(),
                    entity,
                }));
                executors.extend(output.executors.into_iter().map(|entity| Generated {
                    plugin: attachment.id().to_string(),
                    host_type: name.clone(),
                    entity,
                }));
            }

            types.insert(
                name,
                ParsedType {
                    decl: host,
                    relations: Vec::new(),
                    back_relations: Vec::new(),
                    generated_by: None,
                },
            );
        }

        for (host_name, ty) in generated {
            let host_source = sources.get(&host_name).cloned();
            if let Some(existing) = sources.get(ty.name()) {
                return Err(Error::Duplicate {
                    kind: "type",
                    name: ty.name().to_string(),
                    namespace: self.namespace.clone(),
                    first: existing.file_path.clone(),
                    second: host_source.map(|s| s.file_path).unwrap_or_default(),
                });
            }
            if let Some(source) = host_source {
                sources.insert(ty.name().to_string(), source);
            }
            types.insert(ty.name().to_string(), ty);
        }

        resolve_relations(&mut types, &sources)?;
        self.type_order = build_type_order(&types);
        self.types = types;
        self.sources = sources;
        self.plugin_resolvers = resolvers;
        self.plugin_executors = executors;
        Ok(())
    }

    /// Namespace-level attachments, overridden by per-type ones with the same id.
    fn effective_attachments(&self, decl: &TypeDecl) -> Vec<PluginAttachment> {
        let mut by_id: IndexMap<String, PluginAttachment> = IndexMap::new();
        for attachment in self.config.plugins.iter().chain(decl.plugins.iter()) {
            by_id.insert(attachment.id().to_string(), attachment.clone());
        }
        by_id.into_values().collect()
    }
}

/// Add the implicit `id` (first) and, when requested, timestamp fields.
fn with_implicit_fields(mut decl: TypeDecl) -> TypeDecl {
    if !decl.fields.contains_key("id") {
        let id = FieldDecl::new(FieldType::Uuid).with_description("Record identifier");
        decl.fields.shift_insert(0, "id".to_string(), id);
    }
    if decl.timestamps {
        decl.fields
            .entry("createdAt".to_string())
            .or_insert_with(|| FieldDecl::new(FieldType::Datetime));
        decl.fields
            .entry("updatedAt".to_string())
            .or_insert_with(|| FieldDecl::new(FieldType::Datetime).optional());
    }
    decl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{Plugin, PluginContext, PluginOutput};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn service(root: &Path, config: &str) -> TailorDbService {
        let config: DbNamespaceConfig = serde_yaml_ng::from_str(config).unwrap();
        TailorDbService::new(
            "main",
            config,
            root,
            Arc::new(ModuleLoader::new()),
            Arc::new(PluginManager::with_builtins()),
        )
    }

    const USER: &str = "name: User\nfields:\n  email: { type: string, unique: true }\n";

    const ORDER: &str = r#"
name: Order
fields:
  total: { type: float }
  userId: { type: uuid, foreign_key: { type: User } }
plugins:
  - [changeset, { enable: true }]
"#;

    #[tokio::test]
    async fn test_load_types_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", USER);
        write(dir.path(), "db/post.yaml", "name: Post\nfields:\n  authorId: { type: uuid, foreign_key: { type: User } }\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let types = svc.load_types().await.unwrap();

        assert_eq!(types.len(), 2);
        assert_eq!(types["User"].decl.fields.keys().next().unwrap(), "id");
        assert_eq!(types["User"].back_relations[0].source_type, "Post");
        assert_eq!(svc.type_order(), &["User".to_string(), "Post".to_string()]);
        assert!(svc.type_source_info()["Post"].file_path.ends_with("db/post.yaml"));
    }

    #[tokio::test]
    async fn test_mutual_foreign_keys_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", "name: User\nfields:\n  departmentId: { type: uuid, foreign_key: { type: Department } }\n");
        write(dir.path(), "db/department.yaml", "name: Department\nfields:\n  headId: { type: uuid, required: false, foreign_key: { type: User } }\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let types = svc.load_types().await.unwrap();

        assert_eq!(types["User"].relations[0].target_type, "Department");
        assert_eq!(types["Department"].relations[0].target_type, "User");
        assert_eq!(svc.type_order(), &["Department".to_string(), "User".to_string()]);
    }

    #[tokio::test]
    async fn test_get_types_empty_before_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", USER);
        let svc = service(dir.path(), "files: ['db/*.yaml']");
        assert!(svc.get_types().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_type_across_files_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/a.yaml", USER);
        write(dir.path(), "db/b.yaml", USER);
        let mut svc = service(dir.path(), "files: ['db/a.yaml', 'db/b.yaml']");
        let err = svc.load_types().await.unwrap_err();
        assert!(matches!(err, Error::Duplicate { ref name, .. } if name == "User"));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", USER);
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        svc.load_types().await.unwrap();

        // New files are not picked up until reload.
        write(dir.path(), "db/account.yaml", "name: Account\nfields: {}\n");
        assert_eq!(svc.load_types().await.unwrap().len(), 1);
        assert_eq!(svc.reload(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_changeset_expansion() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", USER);
        write(dir.path(), "db/order.yaml", ORDER);
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let types = svc.load_types().await.unwrap();

        assert_eq!(types.len(), 6);
        for suffix in crate::plugins::changeset::GENERATED_SUFFIXES {
            let ty = &types[format!("Order{}", suffix).as_str()];
            assert_eq!(ty.generated_by.as_deref(), Some("changeset"));
        }
        let order = &types["Order"].decl;
        for original in ["id", "total", "userId"] {
            assert!(order.fields.contains_key(original));
        }
        assert!(order.fields.contains_key("versionRecordId"));
        assert_eq!(
            svc.type_source_info()["OrderChangeStep"].file_path,
            svc.type_source_info()["Order"].file_path
        );
        // Generated types are ordered after the types they reference.
        let pos = |n: &str| svc.type_order().iter().position(|t| t == n).unwrap();
        assert!(pos("Order") < pos("OrderChangeRequest"));
        assert!(pos("OrderChangeRequest") < pos("OrderChangeStep"));
    }

    #[tokio::test]
    async fn test_changeset_disabled_leaves_type_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/item.yaml", "name: Item\nfields:\n  sku: { type: string }\nplugins:\n  - [changeset, { enable: false }]\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let types = svc.load_types().await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types["Item"].decl.fields.keys().collect::<Vec<_>>(), vec!["id", "sku"]);
    }

    #[tokio::test]
    async fn test_namespace_plugins_overridden_per_type() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/item.yaml", "name: Item\nfields: {}\nplugins:\n  - [changeset, { enable: false }]\n");
        write(dir.path(), "db/user.yaml", USER);
        let mut svc = service(
            dir.path(),
            "files: ['db/*.yaml']\nplugins:\n  - [changeset, { enable: true, versioned: false }]\n",
        );
        let types = svc.load_types().await.unwrap();
        assert!(types.contains_key("UserChangeRequest"));
        assert!(!types.contains_key("ItemChangeRequest"));
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/item.yaml", "name: Item\nfields: {}\nplugins: [audit-trail]\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        assert_eq!(svc.load_types().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generated_name_collision_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/order.yaml", ORDER.replace("  userId: { type: uuid, foreign_key: { type: User } }\n", "").as_str());
        write(dir.path(), "db/request.yaml", "name: OrderChangeRequest\nfields: {}\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let err = svc.load_types().await.unwrap_err();
        assert!(err.to_string().contains("duplicate type 'OrderChangeRequest'"));
    }

    #[tokio::test]
    async fn test_broken_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/order.yaml", ORDER);
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let err = svc.load_types().await.unwrap_err();
        assert!(err.to_string().contains("unknown type 'User'"));
        assert!(err.to_string().contains("order.yaml"));
    }

    #[tokio::test]
    async fn test_external_namespace_never_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service(dir.path(), "external: true");
        assert!(svc.is_external());
        assert!(svc.load_types().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_added() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/note.yaml", "name: Note\ntimestamps: true\nfields:\n  body: { type: string }\n");
        let mut svc = service(dir.path(), "files: ['db/*.yaml']");
        let types = svc.load_types().await.unwrap();
        let keys: Vec<_> = types["Note"].decl.fields.keys().collect();
        assert_eq!(keys, vec!["id", "body", "createdAt", "updatedAt"]);
    }

    struct ApprovalsPlugin;

    impl Plugin for ApprovalsPlugin {
        fn id(&self) -> &str {
            "approvals"
        }

        fn description(&self) -> &str {
            "Adds an approve mutation"
        }

        fn process(&self, ctx: PluginContext<'_>) -> std::result::Result<PluginOutput, String> {
            let resolver: ResolverDecl = serde_yaml_ng::from_str(&format!(
                "name: approve{}\noperation: mutation\noutput: {{ type: boolean }}\nbody: \"() => true\"\n",
                ctx.type_decl.name
            ))
            .map_err(|e| e.to_string())?;
            Ok(PluginOutput {
                resolvers: vec![resolver],
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_plugin_resolvers_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/user.yaml", USER);
        let mut plugins = PluginManager::new();
        plugins.register(Arc::new(ApprovalsPlugin)).unwrap();
        let config: DbNamespaceConfig =
            serde_yaml_ng::from_str("files: ['db/*.yaml']\nplugins: [approvals]\n").unwrap();
        let mut svc = TailorDbService::new(
            "main",
            config,
            dir.path(),
            Arc::new(ModuleLoader::new()),
            Arc::new(plugins),
        );
        svc.load_types().await.unwrap();
        assert_eq!(svc.plugin_resolvers().len(), 1);
        assert_eq!(svc.plugin_resolvers()[0].entity.name, "approveUser");
        assert_eq!(svc.plugin_resolvers()[0].host_type, "User");
    }
}
