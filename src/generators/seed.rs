//! `@tailor-sdk/seed`: seed-data placeholders.
//!
//! One `<Type>.json` per type, never overwritten once present, and a
//! regenerated `manifest.json` listing files in foreign-key load order.

use super::{
    parse_options, AggregateInput, CodeGenerator, GeneratedFile, Generator, GeneratorOutput, ResolverContext,
    TypeContext,
};
use crate::core::project::DbNamespaceGraph;
use crate::core::types::ExecutorDecl;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub const GENERATOR_ID: &str = "@tailor-sdk/seed";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedOptions {
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
    /// Also create placeholders for plugin-generated types
    #[serde(default)]
    pub include_generated: bool,
}

fn default_dist() -> PathBuf {
    PathBuf::from("seed")
}

#[derive(Debug, Clone)]
pub struct SeedGenerator {
    options: SeedOptions,
}

impl Default for SeedGenerator {
    fn default() -> Self {
        Self {
            options: SeedOptions {
                dist: default_dist(),
                include_generated: false,
            },
        }
    }
}

pub fn factory(options: &Value) -> Result<Arc<dyn Generator>, String> {
    Ok(Arc::new(SeedGenerator {
        options: parse_options(options)?,
    }))
}

#[derive(Debug, Clone)]
pub struct SeedType {
    pub file: String,
    pub included: bool,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    application: &'a str,
    namespace: &'a str,
    files: Vec<&'a str>,
}

impl CodeGenerator for SeedGenerator {
    type TypeOut = SeedType;
    type ResolverOut = ();
    type ExecutorOut = ();

    fn id(&self) -> &'static str {
        GENERATOR_ID
    }

    fn description(&self) -> &'static str {
        "Seed data placeholders"
    }

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<SeedType, String> {
        Ok(SeedType {
            file: format!("{}.json", ctx.parsed.name()),
            included: self.options.include_generated || ctx.parsed.generated_by.is_none(),
        })
    }

    fn process_resolver(&self, _ctx: ResolverContext<'_>) -> Result<(), String> {
        Ok(())
    }

    fn process_executor(&self, _executor: &ExecutorDecl) -> Result<(), String> {
        Ok(())
    }

    fn process_db_namespace(
        &self,
        _application: &str,
        namespace: &DbNamespaceGraph,
        mut types: IndexMap<String, SeedType>,
    ) -> Result<IndexMap<String, SeedType>, String> {
        let mut ordered: IndexMap<String, SeedType> = namespace
            .type_order
            .iter()
            .filter_map(|name| types.shift_remove(name).map(|t| (name.clone(), t)))
            .collect();
        ordered.extend(types);
        ordered.retain(|_, t| t.included);
        Ok(ordered)
    }

    fn aggregate(&self, input: AggregateInput<'_, SeedType, (), ()>) -> GeneratorOutput {
        let mut output = GeneratorOutput::default();
        for app in &input.inputs {
            for ns in app.db.iter().filter(|ns| !ns.items.is_empty()) {
                let dir = self.options.dist.join(&app.application).join(&ns.namespace);
                for seed in ns.items.values() {
                    output
                        .files
                        .push(GeneratedFile::new(dir.join(&seed.file), "[]\n").skip_if_exists());
                }
                let manifest = Manifest {
                    application: &app.application,
                    namespace: &ns.namespace,
                    files: ns.items.values().map(|s| s.file.as_str()).collect(),
                };
                match serde_json::to_string_pretty(&manifest) {
                    Ok(json) => output
                        .files
                        .push(GeneratedFile::new(dir.join("manifest.json"), json + "\n")),
                    Err(e) => output.errors.push(format!("manifest for {}: {}", ns.namespace, e)),
                }
            }
        }
        output
    }
}
