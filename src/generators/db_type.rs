//! `@tailor-sdk/db-type`: TypeScript interfaces for every db namespace.
//!
//! Output: `<dist>/<application>/<namespace>.ts` plus an `index.ts` per
//! application re-exporting each namespace.

use super::{
    one_line, parse_options, AggregateInput, CodeGenerator, GeneratedFile, Generator, GeneratorOutput,
    ResolverContext, TypeContext,
};
use crate::core::types::{ExecutorDecl, FieldDecl, FieldType};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

pub const GENERATOR_ID: &str = "@tailor-sdk/db-type";

pub(crate) const HEADER: &str = "// Generated by tailor-sdk. Do not edit.\n";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbTypeOptions {
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

fn default_dist() -> PathBuf {
    PathBuf::from("types")
}

#[derive(Debug, Clone)]
pub struct DbTypeGenerator {
    options: DbTypeOptions,
}

impl Default for DbTypeGenerator {
    fn default() -> Self {
        Self {
            options: DbTypeOptions { dist: default_dist() },
        }
    }
}

pub fn factory(options: &Value) -> Result<Arc<dyn Generator>, String> {
    Ok(Arc::new(DbTypeGenerator {
        options: parse_options(options)?,
    }))
}

/// TypeScript type for a field, ignoring optionality.
pub(crate) fn ts_type(field: &FieldDecl, indent: usize) -> String {
    let base = match field.field_type {
        FieldType::String | FieldType::Uuid | FieldType::Date | FieldType::Datetime | FieldType::Time => {
            "string".to_string()
        }
        FieldType::Integer | FieldType::Float => "number".to_string(),
        FieldType::Boolean => "boolean".to_string(),
        FieldType::Enum => field
            .values
            .iter()
            .map(|v| format!("\"{}\"", v))
            .collect::<Vec<_>>()
            .join(" | "),
        FieldType::Nested => {
            let pad = "  ".repeat(indent + 1);
            let mut out = String::from("{\n");
            for (name, sub) in &field.fields {
                let _ = writeln!(out, "{}{};", pad, ts_property(name, sub, indent + 1));
            }
            out.push_str(&"  ".repeat(indent));
            out.push('}');
            out
        }
    };
    if field.array {
        if field.field_type == FieldType::Enum && field.values.len() > 1 {
            format!("({})[]", base)
        } else {
            format!("{}[]", base)
        }
    } else {
        base
    }
}

/// `name: T` or `name?: T | null` for optional fields.
pub(crate) fn ts_property(name: &str, field: &FieldDecl, indent: usize) -> String {
    let ty = ts_type(field, indent);
    if field.required {
        format!("{}: {}", name, ty)
    } else {
        format!("{}?: {} | null", name, ty)
    }
}

impl CodeGenerator for DbTypeGenerator {
    type TypeOut = String;
    type ResolverOut = ();
    type ExecutorOut = ();

    fn id(&self) -> &'static str {
        GENERATOR_ID
    }

    fn description(&self) -> &'static str {
        "TypeScript interfaces for db types"
    }

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<String, String> {
        let decl = &ctx.parsed.decl;
        let mut out = String::new();
        if let Some(description) = &decl.description {
            let _ = writeln!(out, "/** {} */", one_line(description));
        }
        let _ = writeln!(out, "export interface {} {{", decl.name);
        for (name, field) in &decl.fields {
            if let Some(description) = &field.description {
                let _ = writeln!(out, "  /** {} */", one_line(description));
            }
            let _ = writeln!(out, "  {};", ts_property(name, field, 1));
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn process_resolver(&self, _ctx: ResolverContext<'_>) -> Result<(), String> {
        Ok(())
    }

    fn process_executor(&self, _executor: &ExecutorDecl) -> Result<(), String> {
        Ok(())
    }

    fn aggregate(&self, input: AggregateInput<'_, String, (), ()>) -> GeneratorOutput {
        let mut files = Vec::new();
        for app in &input.inputs {
            let dir = self.options.dist.join(&app.application);
            let mut index = String::from(HEADER);
            let mut namespaces: IndexMap<&str, String> = IndexMap::new();
            for ns in app.db.iter().filter(|ns| !ns.items.is_empty()) {
                let body = ns.items.values().cloned().collect::<Vec<_>>().join("\n");
                namespaces.insert(&ns.namespace, format!("{}\n{}", HEADER, body));
            }
            if namespaces.is_empty() {
                continue;
            }
            for (namespace, content) in namespaces {
                let _ = writeln!(index, "export * as {} from \"./{}\";", namespace, namespace);
                files.push(GeneratedFile::new(dir.join(format!("{}.ts", namespace)), content));
            }
            files.push(GeneratedFile::new(dir.join("index.ts"), index));
        }
        GeneratorOutput {
            files,
            errors: Vec::new(),
        }
    }
}
