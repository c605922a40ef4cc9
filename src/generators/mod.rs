//! Code generators: per-entity processing, per-namespace hooks, aggregation.
//!
//! A generator implements [`CodeGenerator`] with its own intermediate output
//! types. The blanket [`Generator`] impl drives the fixed sequence for every
//! generator: types, resolvers, executors, namespace hooks, then `aggregate`.
//! Generators are looked up by id in a [`GeneratorRegistry`] and run by
//! [`run_generators`], which isolates failures per generator.

pub mod db_type;
pub mod kysely;
pub mod migration;
pub mod sdl;
pub mod seed;

use crate::context::BuildContext;
use crate::core::output::{contained_join, write_atomic};
use crate::core::project::{AuthGraph, DbNamespaceGraph, ProjectGraph, ResolverNamespaceGraph};
use crate::core::types::{ExecutorDecl, GeneratorRef, ParsedType, ResolverDecl};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One file produced by a generator, relative to the base dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
    /// Leave an existing file untouched
    pub skip_if_exists: bool,
}

impl GeneratedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            skip_if_exists: false,
        }
    }

    pub fn skip_if_exists(mut self) -> Self {
        self.skip_if_exists = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeneratorOutput {
    pub files: Vec<GeneratedFile>,
    pub errors: Vec<String>,
}

impl GeneratorOutput {
    fn failed(message: String) -> Self {
        Self {
            files: Vec::new(),
            errors: vec![message],
        }
    }
}

pub struct TypeContext<'a> {
    pub parsed: &'a ParsedType,
    pub application: &'a str,
    pub namespace: &'a DbNamespaceGraph,
}

pub struct ResolverContext<'a> {
    pub resolver: &'a ResolverDecl,
    pub application: &'a str,
    pub namespace: &'a str,
}

/// Per-namespace results of one generator.
#[derive(Debug, Clone)]
pub struct NamespaceOutput<T> {
    pub namespace: String,
    pub items: IndexMap<String, T>,
}

/// Everything one generator produced for one application.
#[derive(Debug, Clone)]
pub struct GeneratorInput<T, R> {
    pub application: String,
    pub db: Vec<NamespaceOutput<T>>,
    pub resolvers: Vec<NamespaceOutput<R>>,
    pub auth: Option<AuthGraph>,
}

pub struct AggregateInput<'a, T, R, E> {
    pub inputs: Vec<GeneratorInput<T, R>>,
    pub executor_inputs: Vec<E>,
    pub base_dir: &'a Path,
}

/// A code generator with its own intermediate outputs.
///
/// Steps run strictly in sequence for one generator. Only `aggregate`
/// decides output paths.
pub trait CodeGenerator: Send + Sync + 'static {
    type TypeOut;
    type ResolverOut;
    type ExecutorOut;

    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn process_type(&self, ctx: TypeContext<'_>) -> Result<Self::TypeOut, String>;

    fn process_resolver(&self, ctx: ResolverContext<'_>) -> Result<Self::ResolverOut, String>;

    fn process_executor(&self, executor: &ExecutorDecl) -> Result<Self::ExecutorOut, String>;

    fn process_db_namespace(
        &self,
        _application: &str,
        _namespace: &DbNamespaceGraph,
        types: IndexMap<String, Self::TypeOut>,
    ) -> Result<IndexMap<String, Self::TypeOut>, String> {
        Ok(types)
    }

    fn process_resolver_namespace(
        &self,
        _application: &str,
        _namespace: &ResolverNamespaceGraph,
        resolvers: IndexMap<String, Self::ResolverOut>,
    ) -> Result<IndexMap<String, Self::ResolverOut>, String> {
        Ok(resolvers)
    }

    fn aggregate(
        &self,
        input: AggregateInput<'_, Self::TypeOut, Self::ResolverOut, Self::ExecutorOut>,
    ) -> GeneratorOutput;
}

/// Object-safe view of a [`CodeGenerator`].
pub trait Generator: Send + Sync {
    fn id(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn generate(&self, graph: &ProjectGraph, base_dir: &Path) -> GeneratorOutput;
}

impl<G: CodeGenerator> Generator for G {
    fn id(&self) -> &'static str {
        CodeGenerator::id(self)
    }

    fn description(&self) -> &'static str {
        CodeGenerator::description(self)
    }

    fn generate(&self, graph: &ProjectGraph, base_dir: &Path) -> GeneratorOutput {
        match collect_inputs(self, graph) {
            Ok((inputs, executor_inputs)) => self.aggregate(AggregateInput {
                inputs,
                executor_inputs,
                base_dir,
            }),
            Err(message) => GeneratorOutput::failed(message),
        }
    }
}

type Collected<G> = (
    Vec<GeneratorInput<<G as CodeGenerator>::TypeOut, <G as CodeGenerator>::ResolverOut>>,
    Vec<<G as CodeGenerator>::ExecutorOut>,
);

fn collect_inputs<G: CodeGenerator>(generator: &G, graph: &ProjectGraph) -> Result<Collected<G>, String> {
    let mut inputs = Vec::new();
    for app in &graph.applications {
        let mut db = Vec::new();
        for ns in &app.db {
            let mut types = IndexMap::new();
            for (name, parsed) in &ns.types {
                let out = generator
                    .process_type(TypeContext {
                        parsed,
                        application: &app.name,
                        namespace: ns,
                    })
                    .map_err(|e| format!("type '{}' in {}/{}: {}", name, app.name, ns.name, e))?;
                types.insert(name.clone(), out);
            }
            let items = generator
                .process_db_namespace(&app.name, ns, types)
                .map_err(|e| format!("db namespace {}/{}: {}", app.name, ns.name, e))?;
            db.push(NamespaceOutput {
                namespace: ns.name.clone(),
                items,
            });
        }

        let mut resolvers = Vec::new();
        for ns in &app.resolvers {
            let mut outs = IndexMap::new();
            for (name, resolver) in &ns.resolvers {
                let out = generator
                    .process_resolver(ResolverContext {
                        resolver,
                        application: &app.name,
                        namespace: &ns.name,
                    })
                    .map_err(|e| format!("resolver '{}' in {}/{}: {}", name, app.name, ns.name, e))?;
                outs.insert(name.clone(), out);
            }
            let items = generator
                .process_resolver_namespace(&app.name, ns, outs)
                .map_err(|e| format!("resolver namespace {}/{}: {}", app.name, ns.name, e))?;
            resolvers.push(NamespaceOutput {
                namespace: ns.name.clone(),
                items,
            });
        }

        inputs.push(GeneratorInput {
            application: app.name.clone(),
            db,
            resolvers,
            auth: app.auth.clone(),
        });
    }

    let mut executor_inputs = Vec::new();
    for (name, executor) in &graph.executors {
        let out = generator
            .process_executor(executor)
            .map_err(|e| format!("executor '{}': {}", name, e))?;
        executor_inputs.push(out);
    }
    Ok((inputs, executor_inputs))
}

// ============================================================================
// Registry
// ============================================================================

/// Builds a generator from its `options` value.
pub type GeneratorFactory = fn(&Value) -> Result<Arc<dyn Generator>, String>;

#[derive(Clone)]
pub struct GeneratorRegistry {
    factories: IndexMap<String, GeneratorFactory>,
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl GeneratorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&str, GeneratorFactory); 5] = [
            (db_type::GENERATOR_ID, db_type::factory),
            (kysely::GENERATOR_ID, kysely::factory),
            (sdl::GENERATOR_ID, sdl::factory),
            (migration::GENERATOR_ID, migration::factory),
            (seed::GENERATOR_ID, seed::factory),
        ];
        for (id, factory) in builtins {
            registry.factories.insert(id.to_string(), factory);
        }
        registry
    }

    /// Register a factory. Empty or already-registered ids are rejected.
    pub fn register(&mut self, id: &str, factory: GeneratorFactory) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::Config("generator id must not be empty".to_string()));
        }
        if self.factories.contains_key(id) {
            return Err(Error::Config(format!("generator '{}' is already registered", id)));
        }
        self.factories.insert(id.to_string(), factory);
        Ok(())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, reference: &GeneratorRef) -> Result<Arc<dyn Generator>> {
        let id = reference.id();
        let factory = self.factories.get(id).ok_or_else(|| Error::Generator {
            generator: id.to_string(),
            message: "not registered".to_string(),
        })?;
        factory(&reference.options()).map_err(|message| Error::Generator {
            generator: id.to_string(),
            message: format!("invalid options: {}", message),
        })
    }

    /// Instantiate every configured generator, or all builtins when none are configured.
    pub fn create_all(&self, references: &[GeneratorRef]) -> Result<Vec<Arc<dyn Generator>>> {
        if references.is_empty() {
            return self
                .ids()
                .into_iter()
                .map(|id| self.create(&GeneratorRef::Id(id.to_string())))
                .collect();
        }
        references.iter().map(|r| self.create(r)).collect()
    }
}

/// Deserialize generator options, treating null as an empty mapping.
pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(options: &Value) -> Result<T, String> {
    let options = match options {
        Value::Null => Value::Mapping(Default::default()),
        other => other.clone(),
    };
    serde_yaml_ng::from_value(options).map_err(|e| e.to_string())
}

// ============================================================================
// Running and writing
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GeneratorReport {
    pub generator: String,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<String>,
}

impl GeneratorReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Write generated files under `base_dir`. Files flagged `skip_if_exists`
/// are left alone when already present.
pub fn write_files(base_dir: &Path, files: &[GeneratedFile]) -> Result<WriteOutcome> {
    let mut outcome = WriteOutcome::default();
    for file in files {
        let path = contained_join(base_dir, &file.path).map_err(Error::Config)?;
        if file.skip_if_exists && path.exists() {
            tracing::debug!("skipping existing {}", path.display());
            outcome.skipped.push(path);
            continue;
        }
        write_atomic(&path, file.content.as_bytes())?;
        outcome.written.push(path);
    }
    Ok(outcome)
}

/// Run every generator against `graph` and write its files under the output dir.
///
/// Each generator runs on a blocking worker raced against the context timeout.
/// A failing generator writes nothing and does not stop the others.
pub async fn run_generators(
    generators: &[Arc<dyn Generator>],
    graph: Arc<ProjectGraph>,
    ctx: &BuildContext,
) -> Vec<GeneratorReport> {
    let mut reports = Vec::new();
    for generator in generators {
        let id = generator.id().to_string();
        let mut report = GeneratorReport {
            generator: id.clone(),
            ..Default::default()
        };

        let task = {
            let generator = Arc::clone(generator);
            let graph = Arc::clone(&graph);
            let base_dir = ctx.output_dir.clone();
            tokio::task::spawn_blocking(move || generator.generate(&graph, &base_dir))
        };

        let output = match tokio::time::timeout(ctx.generator_timeout, task).await {
            Ok(Ok(output)) => output,
            Ok(Err(join_err)) => GeneratorOutput::failed(format!("generator panicked: {}", join_err)),
            Err(_) => GeneratorOutput::failed(
                Error::Timeout {
                    operation: format!("generator '{}'", id),
                    seconds: ctx.generator_timeout.as_secs(),
                }
                .to_string(),
            ),
        };

        if output.errors.is_empty() {
            match write_files(&ctx.output_dir, &output.files) {
                Ok(outcome) => {
                    report.written = outcome.written;
                    report.skipped = outcome.skipped;
                }
                Err(e) => report.errors.push(e.to_string()),
            }
        } else {
            report.errors = output.errors;
        }

        if report.is_ok() {
            tracing::info!(
                "generator '{}': {} written, {} skipped",
                id,
                report.written.len(),
                report.skipped.len()
            );
        } else {
            tracing::warn!("generator '{}' failed with {} error(s)", id, report.errors.len());
        }
        reports.push(report);
    }
    reports
}

/// Fold failed reports into one error, after every generator has run.
pub fn summarize(reports: &[GeneratorReport]) -> Result<()> {
    let errors = reports
        .iter()
        .flat_map(|r| {
            r.errors.iter().map(|message| Error::Generator {
                generator: r.generator.clone(),
                message: message.clone(),
            })
        })
        .collect();
    Error::collect(errors)
}

/// Doc-comment text for a field or type, single line.
pub(crate) fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}


#[cfg(test)]
mod tests {
    use super::test_support::fixture_graph;
    use super::*;
    use std::time::Duration;

    /// Counts entities and fails on demand.
    struct Counter {
        fail_on: Option<&'static str>,
    }

    impl CodeGenerator for Counter {
        type TypeOut = String;
        type ResolverOut = String;
        type ExecutorOut = String;

        fn id(&self) -> &'static str {
            "counter"
        }

        fn description(&self) -> &'static str {
            "counts entities"
        }

        fn process_type(&self, ctx: TypeContext<'_>) -> Result<String, String> {
            if Some(ctx.parsed.name()) == self.fail_on {
                return Err("refused".to_string());
            }
            Ok(ctx.parsed.name().to_string())
        }

        fn process_resolver(&self, ctx: ResolverContext<'_>) -> Result<String, String> {
            Ok(ctx.resolver.name.clone())
        }

        fn process_executor(&self, executor: &ExecutorDecl) -> Result<String, String> {
            Ok(executor.name.clone())
        }

        fn aggregate(&self, input: AggregateInput<'_, String, String, String>) -> GeneratorOutput {
            let types: usize = input.inputs.iter().flat_map(|i| &i.db).map(|n| n.items.len()).sum();
            GeneratorOutput {
                files: vec![
                    GeneratedFile::new("counts.txt", format!("{} {}", types, input.executor_inputs.len())),
                    GeneratedFile::new("keep.txt", "generated").skip_if_exists(),
                ],
                errors: Vec::new(),
            }
        }
    }

    struct Sleepy;

    impl Generator for Sleepy {
        fn id(&self) -> &'static str {
            "sleepy"
        }
        fn description(&self) -> &'static str {
            "never finishes in time"
        }
        fn generate(&self, _graph: &ProjectGraph, _base_dir: &Path) -> GeneratorOutput {
            std::thread::sleep(Duration::from_millis(500));
            GeneratorOutput::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generated_file_skip_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(fixture_graph(dir.path()).await);
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("keep.txt"), "edited by hand").unwrap();

        let ctx = BuildContext::new(dir.path(), out.path());
        let generators: Vec<Arc<dyn Generator>> = vec![Arc::new(Counter { fail_on: None })];
        let reports = run_generators(&generators, graph, &ctx).await;

        assert!(reports[0].is_ok());
        assert_eq!(std::fs::read_to_string(out.path().join("keep.txt")).unwrap(), "edited by hand");
        assert_eq!(std::fs::read_to_string(out.path().join("counts.txt")).unwrap(), "7 2");
        assert_eq!(reports[0].skipped.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_isolated_per_generator() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(fixture_graph(dir.path()).await);
        let out = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(dir.path(), out.path()).with_timeout(Duration::from_millis(50));

        let generators: Vec<Arc<dyn Generator>> = vec![
            Arc::new(Counter { fail_on: Some("User") }),
            Arc::new(Sleepy),
            Arc::new(seed::SeedGenerator::default()),
        ];
        let reports = run_generators(&generators, graph, &ctx).await;

        assert!(reports[0].errors[0].contains("type 'User' in storefront/main: refused"));
        assert!(!out.path().join("counts.txt").exists());
        assert!(reports[1].errors[0].contains("timed out"));
        assert!(reports[2].is_ok());
        assert!(!reports[2].written.is_empty());

        let err = summarize(&reports).unwrap_err();
        assert!(matches!(err, Error::Multiple(ref errs) if errs.len() == 2));
    }

    #[test]
    fn test_write_files_rejects_escape() {
        let out = tempfile::tempdir().unwrap();
        let files = vec![GeneratedFile::new("../outside.txt", "x")];
        assert!(write_files(out.path(), &files).is_err());
    }

    #[test]
    fn test_registry() {
        let mut registry = GeneratorRegistry::with_builtins();
        assert_eq!(registry.ids().len(), 5);
        assert!(registry.register(sdl::GENERATOR_ID, sdl::factory).is_err());
        assert!(registry.register("", sdl::factory).is_err());

        let err = registry.create(&GeneratorRef::Id("nope".to_string())).err().unwrap();
        assert!(err.to_string().contains("not registered"));

        let generators = registry.create_all(&[]).unwrap();
        assert_eq!(generators.len(), 5);
    }

    #[test]
    fn test_registry_rejects_bad_options() {
        let registry = GeneratorRegistry::with_builtins();
        let reference: GeneratorRef =
            serde_yaml_ng::from_str("id: '@tailor-sdk/db-type'\noptions: { bogus: 1 }").unwrap();
        let err = registry.create(&reference).err().unwrap();
        assert!(err.to_string().contains("invalid options"));
    }
}
