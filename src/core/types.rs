//! Root configuration and declaration types.
//!
//! The root config (`tailor.config.yaml`) and every user declaration (types,
//! resolvers, executors) derive Serialize/Deserialize. Root config types also
//! derive `JsonSchema` so editors can validate them.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Root config
// ============================================================================

/// Root configuration: one project, one or more applications.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Project name
    pub name: String,

    /// Platform workspace (falls back to TAILOR_PLATFORM_WORKSPACE_ID)
    #[serde(default)]
    pub workspace_id: Option<String>,

    /// Values frozen into every bundled function
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Applications (order-preserving)
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,

    /// Executor sources; executors are not namespace-scoped
    #[serde(default)]
    pub executor: Option<ServiceConfig>,

    /// Code generators to run on `generate`
    #[serde(default)]
    pub generators: Vec<GeneratorRef>,
}

/// One application: its database namespaces, resolver namespaces and auth.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApplicationConfig {
    pub name: String,

    /// Database namespaces keyed by namespace name
    #[serde(default)]
    pub db: IndexMap<String, DbNamespaceConfig>,

    /// Resolver namespaces keyed by namespace name
    #[serde(default)]
    pub resolver: IndexMap<String, ServiceConfig>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// Source file set for a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    /// Glob patterns relative to the project root
    pub files: Vec<String>,

    /// Glob patterns to exclude; defaults to test-file patterns when absent
    #[serde(default)]
    pub ignores: Option<Vec<String>>,
}

/// A database namespace, either local (loaded from files) or external.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DbNamespaceConfig {
    /// Declared in another application; counted but never loaded
    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub ignores: Option<Vec<String>>,

    /// Plugin attachments applied to every type in the namespace
    #[serde(default)]
    pub plugins: Vec<PluginAttachment>,
}

impl DbNamespaceConfig {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            files: self.files.clone(),
            ignores: self.ignores.clone(),
        }
    }
}

/// Auth configuration referencing database types by name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthConfig {
    pub name: String,

    pub user_profile: UserProfileConfig,

    #[serde(default)]
    pub tenant_provider: Option<TenantProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserProfileConfig {
    /// Database type holding user profiles
    #[serde(rename = "type")]
    pub type_name: String,

    /// Owning namespace; searched for when absent
    #[serde(default)]
    pub namespace: Option<String>,

    pub username_field: String,

    /// Fields exposed as token attributes
    #[serde(default)]
    pub attributes: IndexMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TenantProviderConfig {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Field carrying the tenant signature
    pub field: String,
}

/// Generator reference: a bare id or id with options.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GeneratorRef {
    Id(String),
    WithOptions {
        id: String,
        #[serde(default)]
        #[schemars(with = "serde_json::Value")]
        options: serde_yaml_ng::Value,
    },
}

impl GeneratorRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::WithOptions { id, .. } => id,
        }
    }

    pub fn options(&self) -> serde_yaml_ng::Value {
        match self {
            Self::Id(_) => serde_yaml_ng::Value::Null,
            Self::WithOptions { options, .. } => options.clone(),
        }
    }
}

/// A `[pluginId, config]` pair (or a bare plugin id) attached to a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PluginAttachment {
    WithConfig(
        String,
        #[schemars(with = "serde_json::Value")] serde_yaml_ng::Value,
    ),
    Bare(String),
}

impl PluginAttachment {
    pub fn id(&self) -> &str {
        match self {
            Self::WithConfig(id, _) => id,
            Self::Bare(id) => id,
        }
    }

    pub fn config(&self) -> Option<&serde_yaml_ng::Value> {
        match self {
            Self::WithConfig(_, config) => Some(config),
            Self::Bare(_) => None,
        }
    }
}

// ============================================================================
// Type declarations
// ============================================================================

/// A database type declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub fields: IndexMap<String, FieldDecl>,

    /// Adds `createdAt` / `updatedAt`
    #[serde(default)]
    pub timestamps: bool,

    #[serde(default)]
    pub plugins: Vec<PluginAttachment>,

    #[serde(default)]
    pub permissions: IndexMap<String, serde_yaml_ng::Value>,

    #[serde(default)]
    pub hooks: IndexMap<String, serde_yaml_ng::Value>,
}

impl TypeDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            fields: IndexMap::new(),
            timestamps: false,
            plugins: Vec::new(),
            permissions: IndexMap::new(),
            hooks: IndexMap::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_field(mut self, name: &str, field: FieldDecl) -> Self {
        self.fields.insert(name.to_string(), field);
        self
    }
}

/// A single field of a type, resolver input, or resolver output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub array: bool,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub index: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Allowed values for `enum` fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Sub-fields for `nested` fields
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, FieldDecl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKey>,
}

fn default_true() -> bool {
    true
}

impl FieldDecl {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            array: false,
            unique: false,
            index: false,
            description: None,
            values: Vec::new(),
            fields: IndexMap::new(),
            foreign_key: None,
        }
    }

    pub fn enumeration(values: &[&str]) -> Self {
        let mut f = Self::new(FieldType::Enum);
        f.values = values.iter().map(|v| v.to_string()).collect();
        f
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn references(mut self, type_name: &str) -> Self {
        self.foreign_key = Some(ForeignKey {
            type_name: type_name.to_string(),
            field: default_fk_field(),
        });
        self
    }
}

/// Scalar and composite field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
    Date,
    Datetime,
    Time,
    Enum,
    Nested,
}

impl FieldType {
    pub const ALL: [&'static str; 10] = [
        "string", "integer", "float", "boolean", "uuid", "date", "datetime", "time", "enum",
        "nested",
    ];
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Time => "time",
            Self::Enum => "enum",
            Self::Nested => "nested",
        };
        write!(f, "{}", s)
    }
}

/// Foreign key from a field to another type in the same namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default = "default_fk_field")]
    pub field: String,
}

fn default_fk_field() -> String {
    "id".to_string()
}

/// A type after plugin expansion and relation resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedType {
    /// Declaration with implicit and plugin-extended fields merged in
    pub decl: TypeDecl,

    pub relations: Vec<Relation>,

    pub back_relations: Vec<BackRelation>,

    /// Plugin id for plugin-generated types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<String>,
}

impl ParsedType {
    pub fn name(&self) -> &str {
        &self.decl.name
    }
}

/// Forward relation declared by a foreign-key field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub field: String,
    pub target_type: String,
    pub target_field: String,
}

/// Reverse side of a relation, recorded on the target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackRelation {
    pub source_type: String,
    pub source_field: String,
}

/// Where a type was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSourceInfo {
    pub file_path: PathBuf,
    pub export_name: String,
}

// ============================================================================
// Resolvers
// ============================================================================

/// A query or mutation handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverDecl {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub operation: ResolverOperation,

    #[serde(default)]
    pub input: IndexMap<String, FieldDecl>,

    pub output: FieldDecl,

    #[serde(default)]
    pub body: Option<FunctionBody>,

    /// Database namespace the body's `db()` accessor defaults to
    #[serde(default)]
    pub db_namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverOperation {
    Query,
    Mutation,
}

impl fmt::Display for ResolverOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
        }
    }
}

/// JS function body: inline expression text or a named export of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionBody {
    Inline(String),
    Module {
        /// Path relative to the declaring file
        file: String,
        #[serde(default = "default_export")]
        export: String,
    },
}

fn default_export() -> String {
    "main".to_string()
}

// ============================================================================
// Executors
// ============================================================================

/// An event- or schedule-triggered unit of behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorDecl {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub trigger: Trigger,

    pub operation: ExecutorOperation,

    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Schedule {
        cron: String,
        #[serde(default = "default_timezone")]
        timezone: String,
    },
    RecordCreated {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        condition: Option<String>,
    },
    RecordUpdated {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        condition: Option<String>,
    },
    RecordDeleted {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        condition: Option<String>,
    },
    ResolverExecuted {
        resolver: String,
    },
    IncomingWebhook,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schedule { .. } => "schedule",
            Self::RecordCreated { .. } => "record_created",
            Self::RecordUpdated { .. } => "record_updated",
            Self::RecordDeleted { .. } => "record_deleted",
            Self::ResolverExecuted { .. } => "resolver_executed",
            Self::IncomingWebhook => "incoming_webhook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorOperation {
    Function {
        #[serde(default)]
        body: Option<FunctionBody>,
    },
    JobFunction {
        #[serde(default)]
        body: Option<FunctionBody>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
        #[serde(default)]
        body: Option<serde_yaml_ng::Value>,
    },
    Graphql {
        query: String,
        #[serde(default)]
        variables: Option<serde_yaml_ng::Value>,
        #[serde(default)]
        app_name: Option<String>,
    },
}

impl ExecutorOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Function { .. } => "function",
            Self::JobFunction { .. } => "job_function",
            Self::Webhook { .. } => "webhook",
            Self::Graphql { .. } => "graphql",
        }
    }

    /// `Some(body)` for function-kind operations, `None` for the rest.
    pub fn function_body(&self) -> Option<Option<&FunctionBody>> {
        match self {
            Self::Function { body } | Self::JobFunction { body } => Some(body.as_ref()),
            Self::Webhook { .. } | Self::Graphql { .. } => None,
        }
    }
}
