//! Changeset plugin: multi-step approval workflow for a host type.
//!
//! With `enable: true`, every host type `T` gains four sibling types:
//! `TChangeRequest`, `TChangeStep`, `TChangeApproval` and
//! `TChangeReworkEvent`. With `versioned: true` (the default) the host type
//! is extended with version-control bookkeeping fields.

use super::{Plugin, PluginContext, PluginOutput};
use crate::core::schema::{ObjectSchema, Schema};
use crate::core::types::{FieldDecl, FieldType, TypeDecl};
use indexmap::IndexMap;
use serde_yaml_ng::Value;

pub const PLUGIN_ID: &str = "changeset";

/// Suffixes of the generated types, in emission order.
pub const GENERATED_SUFFIXES: [&str; 4] = [
    "ChangeRequest",
    "ChangeStep",
    "ChangeApproval",
    "ChangeReworkEvent",
];

pub struct ChangesetPlugin;

impl Plugin for ChangesetPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn description(&self) -> &str {
        "Multi-step change approval workflow with optional record versioning"
    }

    fn config_schema(&self) -> Option<Schema> {
        Some(
            ObjectSchema::new()
                .with_default("enable", Schema::bool(), Value::Bool(false))
                .with_default("versioned", Schema::bool(), Value::Bool(true))
                .strict()
                .into(),
        )
    }

    fn process(&self, ctx: PluginContext<'_>) -> Result<PluginOutput, String> {
        if !flag(ctx.config, "enable") {
            return Ok(PluginOutput::default());
        }

        let host = &ctx.type_decl.name;
        let request = format!("{}ChangeRequest", host);
        let step = format!("{}ChangeStep", host);

        let types = vec![
            change_request(host, &request),
            change_step(host, &request),
            change_approval(host, &request, &step),
            rework_event(host, &request, &step),
        ];

        let extends = if flag(ctx.config, "versioned") {
            version_fields()
        } else {
            IndexMap::new()
        };

        Ok(PluginOutput {
            types,
            extends,
            ..Default::default()
        })
    }
}

fn flag(config: &Value, key: &str) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn workflow_type(name: String, description: String) -> TypeDecl {
    let mut decl = TypeDecl::new(&name).with_description(&description);
    decl.timestamps = true;
    decl
}

fn uuid() -> FieldDecl {
    FieldDecl::new(FieldType::Uuid)
}

fn change_request(host: &str, name: &str) -> TypeDecl {
    workflow_type(name.to_string(), format!("Requested change to a {}", host))
        .with_field("title", FieldDecl::new(FieldType::String))
        .with_field("description", FieldDecl::new(FieldType::String).optional())
        .with_field(
            "status",
            FieldDecl::enumeration(&["draft", "in_review", "approved", "rejected", "applied"]).indexed(),
        )
        .with_field(
            "targetId",
            uuid()
                .references(host)
                .optional()
                .with_description("Record being changed; empty for creations"),
        )
        .with_field("requestedBy", uuid().indexed())
        .with_field(
            "payload",
            FieldDecl::new(FieldType::String)
                .optional()
                .with_description("Proposed record state as JSON"),
        )
}

fn change_step(host: &str, request: &str) -> TypeDecl {
    workflow_type(format!("{}ChangeStep", host), format!("Approval step of a {}", request))
        .with_field("changeRequestId", uuid().references(request).indexed())
        .with_field("position", FieldDecl::new(FieldType::Integer))
        .with_field("name", FieldDecl::new(FieldType::String))
        .with_field(
            "status",
            FieldDecl::enumeration(&["pending", "approved", "rejected", "skipped"]),
        )
        .with_field("assigneeId", uuid().optional())
}

fn change_approval(host: &str, request: &str, step: &str) -> TypeDecl {
    workflow_type(format!("{}ChangeApproval", host), format!("Decision on a {}", step))
        .with_field("changeRequestId", uuid().references(request).indexed())
        .with_field("stepId", uuid().references(step))
        .with_field("approverId", uuid())
        .with_field("decision", FieldDecl::enumeration(&["approved", "rejected"]))
        .with_field("comment", FieldDecl::new(FieldType::String).optional())
        .with_field("decidedAt", FieldDecl::new(FieldType::Datetime))
}

fn rework_event(host: &str, request: &str, step: &str) -> TypeDecl {
    workflow_type(
        format!("{}ChangeReworkEvent", host),
        format!("A {} sent back for rework", request),
    )
    .with_field("changeRequestId", uuid().references(request).indexed())
    .with_field("stepId", uuid().references(step))
    .with_field("reason", FieldDecl::new(FieldType::String))
    .with_field("requestedBy", uuid())
    .with_field("occurredAt", FieldDecl::new(FieldType::Datetime))
}

fn version_fields() -> IndexMap<String, FieldDecl> {
    let mut fields = IndexMap::new();
    fields.insert("versionRecordId".to_string(), uuid().optional().indexed());
    fields.insert(
        "versionState".to_string(),
        FieldDecl::enumeration(&["draft", "active", "superseded"]).optional(),
    );
    fields.insert(
        "effectiveFrom".to_string(),
        FieldDecl::new(FieldType::Datetime).optional(),
    );
    fields.insert(
        "effectiveTo".to_string(),
        FieldDecl::new(FieldType::Datetime).optional(),
    );
    fields.insert("requestedBy".to_string(), uuid().optional());
    fields.insert("approvedBy".to_string(), uuid().optional());
    fields.insert(
        "approvedAt".to_string(),
        FieldDecl::new(FieldType::Datetime).optional(),
    );
    fields
}
