//! Shape schemas for the three declaration kinds.
//!
//! A module export is a type, resolver or executor only if it validates
//! against the matching shape; anything else is silently not an entity.

use super::schema::{ObjectSchema, Schema};
use super::types::FieldType;
use regex::Regex;
use serde_yaml_ng::Value;
use std::sync::LazyLock;

/// Nesting depth for `nested` fields checked structurally; deeper levels pass as-is.
const MAX_FIELD_DEPTH: usize = 4;

static TYPE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9_]*$").expect("type name regex"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

static EXECUTOR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("executor name regex"));

static TYPE_SHAPE: LazyLock<Schema> = LazyLock::new(build_type_shape);
static RESOLVER_SHAPE: LazyLock<Schema> = LazyLock::new(build_resolver_shape);
static EXECUTOR_SHAPE: LazyLock<Schema> = LazyLock::new(build_executor_shape);

pub fn type_shape() -> &'static Schema {
    &TYPE_SHAPE
}

pub fn resolver_shape() -> &'static Schema {
    &RESOLVER_SHAPE
}

pub fn executor_shape() -> &'static Schema {
    &EXECUTOR_SHAPE
}

/// True if `name` is a valid JS identifier (export names, field names).
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn field_shape(depth: usize) -> Schema {
    let nested = if depth >= MAX_FIELD_DEPTH {
        Schema::record(Schema::any())
    } else {
        Schema::record(field_shape(depth + 1))
    };
    ObjectSchema::new()
        .field("type", Schema::one_of(&FieldType::ALL))
        .with_default("required", Schema::bool(), Value::Bool(true))
        .optional("array", Schema::bool())
        .optional("unique", Schema::bool())
        .optional("index", Schema::bool())
        .optional("description", Schema::string())
        .optional("values", Schema::array(Schema::non_empty_string()))
        .optional("fields", nested)
        .optional(
            "foreign_key",
            ObjectSchema::new()
                .field("type", Schema::matching(TYPE_NAME.clone()))
                .optional("field", Schema::matching(IDENTIFIER.clone())),
        )
        .into()
}

fn function_body_shape() -> Schema {
    Schema::union(vec![
        Schema::non_empty_string(),
        ObjectSchema::new()
            .field("file", Schema::non_empty_string())
            .optional("export", Schema::matching(IDENTIFIER.clone()))
            .into(),
    ])
}

fn plugin_attachment_shape() -> Schema {
    Schema::union(vec![Schema::non_empty_string(), Schema::array(Schema::any())])
}

fn build_type_shape() -> Schema {
    ObjectSchema::new()
        .field("name", Schema::matching(TYPE_NAME.clone()))
        .optional("description", Schema::string())
        .field("fields", Schema::record(field_shape(0)))
        .optional("timestamps", Schema::bool())
        .optional("plugins", Schema::array(plugin_attachment_shape()))
        .optional("permissions", Schema::record(Schema::any()))
        .optional("hooks", Schema::record(Schema::any()))
        .into()
}

fn build_resolver_shape() -> Schema {
    ObjectSchema::new()
        .field("name", Schema::matching(IDENTIFIER.clone()))
        .optional("description", Schema::string())
        .field("operation", Schema::one_of(&["query", "mutation"]))
        .optional("input", Schema::record(field_shape(0)))
        .field("output", field_shape(0))
        .optional("body", function_body_shape())
        .optional("db_namespace", Schema::non_empty_string())
        .into()
}

fn record_trigger() -> ObjectSchema {
    ObjectSchema::new()
        .field("type", Schema::matching(TYPE_NAME.clone()))
        .optional("condition", Schema::string())
}

fn build_executor_shape() -> Schema {
    let trigger = Schema::tagged(
        "kind",
        vec![
            (
                "schedule",
                ObjectSchema::new()
                    .field("cron", Schema::non_empty_string())
                    .optional("timezone", Schema::non_empty_string()),
            ),
            ("record_created", record_trigger()),
            ("record_updated", record_trigger()),
            ("record_deleted", record_trigger()),
            (
                "resolver_executed",
                ObjectSchema::new().field("resolver", Schema::matching(IDENTIFIER.clone())),
            ),
            ("incoming_webhook", ObjectSchema::new()),
        ],
    );
    let operation = Schema::tagged(
        "kind",
        vec![
            (
                "function",
                ObjectSchema::new().optional("body", function_body_shape()),
            ),
            (
                "job_function",
                ObjectSchema::new().optional("body", function_body_shape()),
            ),
            (
                "webhook",
                ObjectSchema::new()
                    .field("url", Schema::non_empty_string())
                    .optional("headers", Schema::record(Schema::string()))
                    .optional("body", Schema::any()),
            ),
            (
                "graphql",
                ObjectSchema::new()
                    .field("query", Schema::non_empty_string())
                    .optional("variables", Schema::any())
                    .optional("app_name", Schema::non_empty_string()),
            ),
        ],
    );
    ObjectSchema::new()
        .field("name", Schema::matching(EXECUTOR_NAME.clone()))
        .optional("description", Schema::string())
        .field("trigger", trigger)
        .field("operation", operation)
        .optional("disabled", Schema::bool())
        .into()
}
