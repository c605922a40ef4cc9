//! `@tailor-sdk/kysely-type`: Kysely `DB` interface per db namespace.

use super::db_type::{ts_type, HEADER};
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

pub const GENERATOR_ID: &str = "@tailor-sdk/kysely-type";

const PRELUDE: &str = "import type { ColumnType, Generated } from \"kysely\";\n\n\
export type Timestamp = ColumnType<Date, Date | string, Date | string>;\n";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KyselyOptions {
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

fn default_dist() -> PathBuf {
    PathBuf::from("kysely")
}

#[derive(Debug, Clone)]
pub struct KyselyGenerator {
    options: KyselyOptions,
}

impl Default for KyselyGenerator {
    fn default() -> Self {
        Self {
            options: KyselyOptions { dist: default_dist() },
        }
    }
}

pub fn factory(options: &Value) -> Result<Arc<dyn Generator>, String> {
    Ok(Arc::new(KyselyGenerator {
        options: parse_options(options)?,
    }))
}

/// A table interface and its key in the `DB` interface.
#[derive(Debug, Clone)]
pub struct Table {
    pub table_name: String,
    pub interface: String,
    pub source: String,
}

fn column_type(name: &str, field: &FieldDecl) -> String {
    let base = match field.field_type {
        FieldType::Datetime | FieldType::Date if !field.array => "Timestamp".to_string(),
        _ => ts_type(field, 1),
    };
    let ty = if field.required {
        base
    } else {
        format!("{} | null", base)
    };
    if name == "id" || name == "createdAt" {
        format!("Generated<{}>", ty)
    } else {
        ty
    }
}

impl CodeGenerator for KyselyGenerator {
    type TypeOut = Table;
    type ResolverOut = ();
    type ExecutorOut = ();

    fn id(&self) -> &'static str {
        GENERATOR_ID
    }

    fn description(&self) -> &'static str {
        "Kysely table bindings for db types"
    }

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<Table, String> {
        let decl = &ctx.parsed.decl;
        let interface = format!("{}Table", decl.name);
        let mut source = format!("export interface {} {{\n", interface);
        for (name, field) in &decl.fields {
            let _ = writeln!(source, "  {}: {};", name, column_type(name, field));
        }
        source.push_str("}\n");
        Ok(Table {
            table_name: decl.name.to_case(Case::Snake),
            interface,
            source,
        })
    }

    fn process_resolver(&self, _ctx: ResolverContext<'_>) -> Result<(), String> {
        Ok(())
    }

    fn process_executor(&self, _executor: &ExecutorDecl) -> Result<(), String> {
        Ok(())
    }

    /// Two types must not map to the same snake-case table name.
    fn process_db_namespace(
        &self,
        _application: &str,
        namespace: &DbNamespaceGraph,
        types: IndexMap<String, Table>,
    ) -> Result<IndexMap<String, Table>, String> {
        let mut seen: IndexMap<&str, &str> = IndexMap::new();
        for (name, table) in &types {
            if let Some(other) = seen.insert(table.table_name.as_str(), name.as_str()) {
                return Err(format!(
                    "types '{}' and '{}' in namespace '{}' both map to table '{}'",
                    other, name, namespace.name, table.table_name
                ));
            }
        }
        Ok(types)
    }

    fn aggregate(&self, input: AggregateInput<'_, Table, (), ()>) -> GeneratorOutput {
        let mut files = Vec::new();
        for app in &input.inputs {
            for ns in app.db.iter().filter(|ns| !ns.items.is_empty()) {
                let mut content = format!("{}{}\n", HEADER, PRELUDE);
                for table in ns.items.values() {
                    content.push_str(&table.source);
                    content.push('\n');
                }
                content.push_str("export interface DB {\n");
                for table in ns.items.values() {
                    let _ = writeln!(content, "  {}: {};", table.table_name, table.interface);
                }
                content.push_str("}\n");
                let path = self
                    .options
                    .dist
                    .join(&app.application)
                    .join(format!("{}.ts", ns.namespace));
                files.push(GeneratedFile::new(path, content));
            }
        }
        GeneratorOutput {
            files,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{file, fixture_graph};
    use super::*;

    #[tokio::test]
    async fn test_db_interface() {
        let dir = tempfile::tempdir().unwrap();
        let graph = fixture_graph(dir.path()).await;
        let output = Generator::generate(&KyselyGenerator::default(), &graph, dir.path());
        assert!(output.errors.is_empty(), "{:?}", output.errors);

        let main = &file(&output, "kysely/storefront/main.ts").content;
        assert!(main.contains("import type { ColumnType, Generated } from \"kysely\";"));
        assert!(main.contains("export interface UserTable {\n  id: Generated<string>;\n"));
        assert!(main.contains("  createdAt: Generated<Timestamp>;\n"));
        assert!(main.contains("  updatedAt: Timestamp | null;\n"));
        assert!(main.contains("  order_change_request: OrderChangeRequestTable;\n"));
    }

    #[test]
    fn test_column_types() {
        assert_eq!(column_type("total", &FieldDecl::new(FieldType::Float)), "number");
        assert_eq!(
            column_type("note", &FieldDecl::new(FieldType::String).optional()),
            "string | null"
        );
        let mut days = FieldDecl::new(FieldType::Date);
        days.array = true;
        assert_eq!(column_type("days", &days), "string[]");
    }
}
