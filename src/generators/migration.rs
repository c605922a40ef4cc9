//! `@tailor-sdk/migration`: SQL scaffolding per db namespace.
//!
//! Tables are emitted in foreign-key order so every `REFERENCES` target
//! already exists. References to a table created later (foreign-key cycles)
//! become `ALTER TABLE ... ADD FOREIGN KEY` statements after all tables.

use super::{
    parse_options, AggregateInput, CodeGenerator, GeneratedFile, Generator, GeneratorOutput, ResolverContext,
    TypeContext,
};
use crate::core::project::DbNamespaceGraph;
use crate::core::types::{ExecutorDecl, FieldDecl, FieldType};
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

pub const GENERATOR_ID: &str = "@tailor-sdk/migration";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationOptions {
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

fn default_dist() -> PathBuf {
    PathBuf::from("migrations")
}

#[derive(Debug, Clone)]
pub struct MigrationGenerator {
    options: MigrationOptions,
}

impl Default for MigrationGenerator {
    fn default() -> Self {
        Self {
            options: MigrationOptions { dist: default_dist() },
        }
    }
}

pub fn factory(options: &Value) -> Result<Arc<dyn Generator>, String> {
    Ok(Arc::new(MigrationGenerator {
        options: parse_options(options)?,
    }))
}

fn sql_type(field: &FieldDecl) -> String {
    let scalar = match field.field_type {
        FieldType::String | FieldType::Enum => "TEXT",
        FieldType::Integer => "BIGINT",
        FieldType::Float => "DOUBLE PRECISION",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Uuid => "UUID",
        FieldType::Date => "DATE",
        FieldType::Datetime => "TIMESTAMPTZ",
        FieldType::Time => "TIME",
        FieldType::Nested => return "JSONB".to_string(),
    };
    if field.array {
        format!("{}[]", scalar)
    } else {
        scalar.to_string()
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Statements for one table: the create (with indexes) and any deferred
/// foreign keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSql {
    pub create: String,
    pub deferred: Vec<String>,
}

fn column(name: &str, field: &FieldDecl, inline_reference: bool) -> String {
    let mut col = format!("{} {}", quote(name), sql_type(field));
    if name == "id" {
        col.push_str(" PRIMARY KEY");
        return col;
    }
    if field.required {
        col.push_str(" NOT NULL");
    }
    if field.unique {
        col.push_str(" UNIQUE");
    }
    if field.field_type == FieldType::Enum && !field.array && !field.values.is_empty() {
        let values = field
            .values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(col, " CHECK ({} IN ({}))", quote(name), values);
    }
    if let Some(fk) = field.foreign_key.as_ref().filter(|_| inline_reference) {
        let _ = write!(col, " REFERENCES {} ({})", quote(&fk.type_name), quote(&fk.field));
    }
    col
}

/// True if `target` is created after `table` in the namespace order.
fn created_later(namespace: &DbNamespaceGraph, table: &str, target: &str) -> bool {
    let pos = |name: &str| namespace.type_order.iter().position(|t| t == name);
    matches!((pos(table), pos(target)), (Some(own), Some(other)) if other > own)
}

impl CodeGenerator for MigrationGenerator {
    type TypeOut = TableSql;
    type ResolverOut = ();
    type ExecutorOut = ();

    fn id(&self) -> &'static str {
        GENERATOR_ID
    }

    fn description(&self) -> &'static str {
        "SQL CREATE TABLE scaffolding"
    }

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<TableSql, String> {
        let decl = &ctx.parsed.decl;
        let table = quote(&decl.name);
        let mut deferred = Vec::new();
        let mut columns = Vec::new();
        for (name, field) in &decl.fields {
            let later = field
                .foreign_key
                .as_ref()
                .is_some_and(|fk| created_later(ctx.namespace, &decl.name, &fk.type_name));
            columns.push(format!("  {}", column(name, field, !later)));
            if let Some(fk) = field.foreign_key.as_ref().filter(|_| later) {
                deferred.push(format!(
                    "ALTER TABLE {} ADD FOREIGN KEY ({}) REFERENCES {} ({});\n",
                    table,
                    quote(name),
                    quote(&fk.type_name),
                    quote(&fk.field)
                ));
            }
        }
        let mut create = format!("CREATE TABLE {} (\n{}\n);\n", table, columns.join(",\n"));
        for (name, field) in &decl.fields {
            if field.index && !field.unique {
                let index = format!(
                    "idx_{}_{}",
                    decl.name.to_case(Case::Snake),
                    name.to_case(Case::Snake)
                );
                let _ = writeln!(create, "CREATE INDEX {} ON {} ({});", quote(&index), table, quote(name));
            }
        }
        Ok(TableSql { create, deferred })
    }

    fn process_resolver(&self, _ctx: ResolverContext<'_>) -> Result<(), String> {
        Ok(())
    }

    fn process_executor(&self, _executor: &ExecutorDecl) -> Result<(), String> {
        Ok(())
    }

    /// Reorder statements into foreign-key order.
    fn process_db_namespace(
        &self,
        _application: &str,
        namespace: &DbNamespaceGraph,
        mut types: IndexMap<String, TableSql>,
    ) -> Result<IndexMap<String, TableSql>, String> {
        let mut ordered = IndexMap::new();
        for name in &namespace.type_order {
            let sql = types
                .shift_remove(name)
                .ok_or_else(|| format!("type '{}' is missing from namespace '{}'", name, namespace.name))?;
            ordered.insert(name.clone(), sql);
        }
        ordered.extend(types);
        Ok(ordered)
    }

    fn aggregate(&self, input: AggregateInput<'_, TableSql, (), ()>) -> GeneratorOutput {
        let mut files = Vec::new();
        for app in &input.inputs {
            for ns in app.db.iter().filter(|ns| !ns.items.is_empty()) {
                let mut content = format!(
                    "-- Generated by tailor-sdk: {}/{}\n",
                    app.application, ns.namespace
                );
                for table in ns.items.values() {
                    content.push('\n');
                    content.push_str(&table.create);
                }
                let deferred: Vec<&String> = ns.items.values().flat_map(|t| &t.deferred).collect();
                if !deferred.is_empty() {
                    content.push('\n');
                    for statement in deferred {
                        content.push_str(statement);
                    }
                }
                let path = self
                    .options
                    .dist
                    .join(&app.application)
                    .join(format!("{}.sql", ns.namespace));
                files.push(GeneratedFile::new(path, content));
            }
        }
        GeneratorOutput {
            files,
            errors: Vec::new(),
        }
    }
}
