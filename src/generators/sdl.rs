//! `@tailor-sdk/sdl`: GraphQL SDL per application.
//!
//! Enum and nested fields become their own named definitions
//! (`<Owner><Field>`). Resolvers contribute `<Name>Input` input types and
//! fields on the `Query` / `Mutation` roots.

use super::{
    one_line, parse_options, AggregateInput, CodeGenerator, GeneratedFile, Generator, GeneratorOutput,
    ResolverContext, TypeContext,
};
use crate::core::types::{ExecutorDecl, FieldDecl, FieldType, ResolverOperation};
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

pub const GENERATOR_ID: &str = "@tailor-sdk/sdl";

const PRELUDE: &str = "# Generated by tailor-sdk. Do not edit.\n\nscalar Date\nscalar DateTime\nscalar Time\n";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdlOptions {
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
}

fn default_dist() -> PathBuf {
    PathBuf::from("schema")
}

#[derive(Debug, Clone)]
pub struct SdlGenerator {
    options: SdlOptions,
}

impl Default for SdlGenerator {
    fn default() -> Self {
        Self {
            options: SdlOptions { dist: default_dist() },
        }
    }
}

pub fn factory(options: &Value) -> Result<Arc<dyn Generator>, String> {
    Ok(Arc::new(SdlGenerator {
        options: parse_options(options)?,
    }))
}

/// SDL for one type and the helper definitions it needs.
#[derive(Debug, Clone)]
pub struct TypeSdl {
    pub name: String,
    pub definitions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResolverSdl {
    pub operation: ResolverOperation,
    pub root_field: String,
    pub definitions: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Object,
    Input,
}

impl Kind {
    fn keyword(self) -> &'static str {
        match self {
            Kind::Object => "type",
            Kind::Input => "input",
        }
    }
}

/// Field type reference, hoisting enum and nested definitions into `defs`.
fn type_ref(owner: &str, name: &str, field: &FieldDecl, kind: Kind, defs: &mut Vec<String>) -> String {
    let helper = format!("{}{}", owner, name.to_case(Case::Pascal));
    let base = match field.field_type {
        FieldType::String => "String".to_string(),
        FieldType::Integer => "Int".to_string(),
        FieldType::Float => "Float".to_string(),
        FieldType::Boolean => "Boolean".to_string(),
        FieldType::Uuid => "ID".to_string(),
        FieldType::Date => "Date".to_string(),
        FieldType::Datetime => "DateTime".to_string(),
        FieldType::Time => "Time".to_string(),
        FieldType::Enum => {
            let mut def = format!("enum {} {{\n", helper);
            for value in &field.values {
                let _ = writeln!(def, "  {}", value);
            }
            def.push_str("}\n");
            defs.push(def);
            helper
        }
        FieldType::Nested => {
            let body = object_fields(&helper, &field.fields, kind, defs);
            defs.push(format!("{} {} {{\n{}}}\n", kind.keyword(), helper, body));
            helper
        }
    };
    let item = if field.array { format!("[{}!]", base) } else { base };
    if field.required {
        format!("{}!", item)
    } else {
        item
    }
}

fn object_fields(owner: &str, fields: &IndexMap<String, FieldDecl>, kind: Kind, defs: &mut Vec<String>) -> String {
    let mut body = String::new();
    for (name, field) in fields {
        if let Some(description) = &field.description {
            let _ = writeln!(body, "  \"{}\"", one_line(description).replace('"', "\\\""));
        }
        let ty = type_ref(owner, name, field, kind, defs);
        let _ = writeln!(body, "  {}: {}", name, ty);
    }
    body
}

impl CodeGenerator for SdlGenerator {
    type TypeOut = TypeSdl;
    type ResolverOut = ResolverSdl;
    type ExecutorOut = ();

    fn id(&self) -> &'static str {
        GENERATOR_ID
    }

    fn description(&self) -> &'static str {
        "GraphQL SDL for types and resolvers"
    }

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<TypeSdl, String> {
        let parsed = ctx.parsed;
        let decl = &parsed.decl;
        let mut definitions = Vec::new();
        let mut body = object_fields(&decl.name, &decl.fields, Kind::Object, &mut definitions);

        // `userId -> User` also exposes `user: User`
        for relation in &parsed.relations {
            let Some(stem) = relation.field.strip_suffix("Id").filter(|s| !s.is_empty()) else {
                continue;
            };
            if decl.fields.contains_key(stem) {
                continue;
            }
            let required = decl.fields.get(&relation.field).is_some_and(|f| f.required);
            let _ = writeln!(
                body,
                "  {}: {}{}",
                stem,
                relation.target_type,
                if required { "!" } else { "" }
            );
        }

        let mut def = String::new();
        if let Some(description) = &decl.description {
            let _ = writeln!(def, "\"{}\"", one_line(description).replace('"', "\\\""));
        }
        let _ = write!(def, "type {} {{\n{}}}\n", decl.name, body);
        definitions.push(def);
        Ok(TypeSdl {
            name: decl.name.clone(),
            definitions,
        })
    }

    fn process_resolver(&self, ctx: ResolverContext<'_>) -> Result<ResolverSdl, String> {
        let resolver = ctx.resolver;
        let pascal = resolver.name.to_case(Case::Pascal);
        let mut definitions = Vec::new();

        let args = if resolver.input.is_empty() {
            String::new()
        } else {
            let input_name = format!("{}Input", pascal);
            let body = object_fields(&input_name, &resolver.input, Kind::Input, &mut definitions);
            definitions.push(format!("input {} {{\n{}}}\n", input_name, body));
            format!("(input: {}!)", input_name)
        };
        let output = type_ref(&pascal, "Output", &resolver.output, Kind::Object, &mut definitions);

        let mut root_field = String::new();
        if let Some(description) = &resolver.description {
            let _ = writeln!(root_field, "  \"{}\"", one_line(description).replace('"', "\\\""));
        }
        let _ = writeln!(root_field, "  {}{}: {}", resolver.name, args, output);
        Ok(ResolverSdl {
            operation: resolver.operation,
            root_field,
            definitions,
        })
    }

    fn process_executor(&self, _executor: &ExecutorDecl) -> Result<(), String> {
        Ok(())
    }

    fn aggregate(&self, input: AggregateInput<'_, TypeSdl, ResolverSdl, ()>) -> GeneratorOutput {
        let mut output = GeneratorOutput::default();
        for app in &input.inputs {
            let mut content = String::from(PRELUDE);
            let mut declared: IndexMap<&str, &str> = IndexMap::new();
            let mut empty = true;

            for ns in &app.db {
                for sdl in ns.items.values() {
                    if let Some(first) = declared.insert(&sdl.name, &ns.namespace) {
                        output.errors.push(format!(
                            "application '{}': type '{}' is declared in namespaces '{}' and '{}'",
                            app.application, sdl.name, first, ns.namespace
                        ));
                    }
                    for def in &sdl.definitions {
                        content.push('\n');
                        content.push_str(def);
                    }
                    empty = false;
                }
            }

            let mut query = String::new();
            let mut mutation = String::new();
            for ns in &app.resolvers {
                for sdl in ns.items.values() {
                    for def in &sdl.definitions {
                        content.push('\n');
                        content.push_str(def);
                    }
                    match sdl.operation {
                        ResolverOperation::Query => query.push_str(&sdl.root_field),
                        ResolverOperation::Mutation => mutation.push_str(&sdl.root_field),
                    }
                    empty = false;
                }
            }
            if !query.is_empty() {
                let _ = write!(content, "\ntype Query {{\n{}}}\n", query);
            }
            if !mutation.is_empty() {
                let _ = write!(content, "\ntype Mutation {{\n{}}}\n", mutation);
            }

            if !empty {
                let path = self.options.dist.join(format!("{}.graphql", app.application));
                output.files.push(GeneratedFile::new(path, content));
            }
        }
        if !output.errors.is_empty() {
            output.files.clear();
        }
        output
    }
}
