//! Type plugins: named expansions attached to database types.
//!
//! A plugin is looked up by id from a `[pluginId, config]` attachment. Its
//! config is validated against the plugin's own schema, then `process`
//! produces sibling types, resolvers, executors and field extensions for the
//! host type. Plugins are pure functions of their inputs.

pub mod changeset;

use crate::core::schema::Schema;
use crate::core::types::{ExecutorDecl, FieldDecl, PluginAttachment, ResolverDecl, TypeDecl};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_yaml_ng::{Mapping, Value};
use std::sync::Arc;

/// Inputs to [`Plugin::process`].
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    pub type_decl: &'a TypeDecl,
    /// Config after schema validation (defaults applied)
    pub config: &'a Value,
    pub namespace: &'a str,
}

/// Everything a plugin contributes for one host type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginOutput {
    pub types: Vec<TypeDecl>,
    pub resolvers: Vec<ResolverDecl>,
    pub executors: Vec<ExecutorDecl>,
    /// Fields merged into the host type
    pub extends: IndexMap<String, FieldDecl>,
}

impl PluginOutput {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.resolvers.is_empty()
            && self.executors.is_empty()
            && self.extends.is_empty()
    }
}

pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Schema for the attachment config; `None` accepts anything.
    fn config_schema(&self) -> Option<Schema> {
        None
    }

    fn process(&self, ctx: PluginContext<'_>) -> std::result::Result<PluginOutput, String>;
}

/// A request to expand one host type with one attachment.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentRequest<'a> {
    pub type_decl: &'a TypeDecl,
    pub attachment: &'a PluginAttachment,
    pub namespace: &'a str,
}

/// Registry of plugins keyed by stable id.
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: IndexMap<String, Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with the built-in plugins registered.
    pub fn with_builtins() -> Self {
        let mut manager = Self::new();
        manager.plugins.insert(
            changeset::PLUGIN_ID.to_string(),
            Arc::new(changeset::ChangesetPlugin),
        );
        manager
    }

    /// Register a plugin. Empty and duplicate ids are rejected.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let id = plugin.id().trim();
        if id.is_empty() {
            return Err(Error::Config("plugin id must not be empty".to_string()));
        }
        if self.plugins.contains_key(id) {
            return Err(Error::Config(format!("plugin '{}' is already registered", id)));
        }
        self.plugins.insert(id.to_string(), plugin);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Expand one attachment.
    ///
    /// An unknown plugin id is a warning and yields an empty output. A config
    /// rejected by the plugin's schema is fatal.
    pub async fn process_attachment(&self, request: AttachmentRequest<'_>) -> Result<PluginOutput> {
        let plugin_id = request.attachment.id();
        let type_name = &request.type_decl.name;

        let Some(plugin) = self.plugins.get(plugin_id) else {
            tracing::warn!(
                "unknown plugin '{}' on type '{}' in namespace '{}'; type left unmodified",
                plugin_id,
                type_name,
                request.namespace
            );
            return Ok(PluginOutput::default());
        };

        let raw = request
            .attachment
            .config()
            .cloned()
            .unwrap_or_else(|| Value::Mapping(Mapping::new()));
        let config = match plugin.config_schema() {
            Some(schema) => schema.validate(&raw).map_err(|issues| Error::PluginConfig {
                plugin: plugin_id.to_string(),
                type_name: type_name.clone(),
                issues,
            })?,
            None => raw,
        };

        let output = plugin
            .process(PluginContext {
                type_decl: request.type_decl,
                config: &config,
                namespace: request.namespace,
            })
            .map_err(|message| Error::Plugin {
                plugin: plugin_id.to_string(),
                type_name: type_name.clone(),
                message,
            })?;

        tracing::debug!(
            "plugin '{}' on '{}': {} type(s), {} extension field(s)",
            plugin_id,
            type_name,
            output.types.len(),
            output.extends.len()
        );
        Ok(output)
    }
}
