//! CLI subcommands: init, validate, generate, bundle, apply, schema, completions.

use crate::bundler;
use crate::core::parser::DEFAULT_CONFIG_FILE;
use crate::core::project::{Project, ProjectGraph};
use crate::core::types::RootConfig;
use crate::core::watch;
use crate::error::{Error, Result};
use crate::generators::{self, GeneratorRegistry, GeneratorReport};
use crate::platform::{self, local::LocalStateClient, DeploymentPlan};
use crate::plugins::PluginManager;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "tailor-sdk",
    version,
    about = "Schema-driven application SDK: load, validate, generate, bundle and apply"
)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the project lives and where output goes.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Path to the root config
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "TAILOR_SDK_CONFIG")]
    pub config: PathBuf,

    /// Output directory (default: $TAILOR_SDK_OUTPUT_DIR or .tailor-sdk)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Load and validate every declaration without writing anything
    Validate {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Run code generators
    Generate {
        #[command(flatten)]
        project: ProjectArgs,

        /// Keep running and regenerate when sources change
        #[arg(short, long)]
        watch: bool,

        /// Poll interval in milliseconds for --watch
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Bundle resolver and executor functions
    Bundle {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Bundle, plan and apply the project to the platform
    Apply {
        #[command(flatten)]
        project: ProjectArgs,

        /// Show the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the JSON Schema of the root config
    Schema {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { project } => cmd_validate(&project).await,
        Commands::Generate {
            project,
            watch,
            interval_ms,
        } => cmd_generate(&project, watch, Duration::from_millis(interval_ms)).await,
        Commands::Bundle { project } => cmd_bundle(&project).await,
        Commands::Apply { project, dry_run } => cmd_apply(&project, dry_run).await,
        Commands::Schema { output } => cmd_schema(output.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tailor-sdk", &mut std::io::stdout());
            Ok(())
        }
    }
}

const CONFIG_TEMPLATE: &str = r#"name: {name}
env: {}

applications:
  - name: {name}
    db:
      main:
        files: ["db/**/*.yaml"]
    resolver:
      main:
        files: ["resolvers/**/*.yaml"]

executor:
  files: ["executors/**/*.yaml"]

generators:
  - "@tailor-sdk/db-type"
  - "@tailor-sdk/sdl"
"#;

const TYPE_TEMPLATE: &str = r#"name: User
description: Application user
timestamps: true
fields:
  email: { type: string, unique: true }
  name: { type: string, required: false }
"#;

const RESOLVER_TEMPLATE: &str = r#"name: hello
operation: query
input:
  name: { type: string }
output: { type: string }
body: "({ input }) => `Hello, ${input.name}!`"
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        return Err(Error::Config(format!("{} already exists", config_path.display())));
    }

    let name = std::path::absolute(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "my-app".to_string());

    let files = [
        (config_path.clone(), CONFIG_TEMPLATE.replace("{name}", &name)),
        (path.join("db/user.yaml"), TYPE_TEMPLATE.to_string()),
        (path.join("resolvers/hello.yaml"), RESOLVER_TEMPLATE.to_string()),
    ];
    for (file, content) in &files {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(file, content).map_err(|e| Error::io(file, e))?;
    }
    let executors = path.join("executors");
    std::fs::create_dir_all(&executors).map_err(|e| Error::io(&executors, e))?;

    println!("Initialized tailor-sdk project at {}", path.display());
    for (file, _) in &files {
        println!("  Created: {}", file.display());
    }
    println!("  Created: {}/", executors.display());
    Ok(())
}

/// Parse, validate and load the project named by `args`.
async fn load_project(args: &ProjectArgs, registry: &GeneratorRegistry) -> Result<Project> {
    let mut project = Project::open(
        &args.config,
        args.output_dir.as_deref(),
        &registry.ids(),
        Arc::new(PluginManager::with_builtins()),
    )?;
    project.load().await?;
    Ok(project)
}

async fn cmd_validate(args: &ProjectArgs) -> Result<()> {
    let project = load_project(args, &GeneratorRegistry::with_builtins()).await?;
    let graph = project.graph()?;
    println!(
        "OK: {} ({} applications, {} types, {} resolvers, {} executors)",
        graph.name,
        graph.applications.len(),
        graph.type_count(),
        graph.resolver_count(),
        graph.executors.len()
    );
    Ok(())
}

async fn cmd_generate(args: &ProjectArgs, watch: bool, interval: Duration) -> Result<()> {
    let registry = GeneratorRegistry::with_builtins();
    let mut project = load_project(args, &registry).await?;
    let generators = registry.create_all(&project.config.generators)?;
    let ctx = project.ctx.clone();

    let reports = generators::run_generators(&generators, Arc::new(project.graph()?), &ctx).await;
    print_reports(&reports);
    let outcome = generators::summarize(&reports);
    if !watch {
        return outcome;
    }
    if let Err(e) = outcome {
        eprintln!("error: {}", e);
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    watch::run(&mut project, interval, shutdown, |graph: Arc<ProjectGraph>| {
        let generators = generators.clone();
        let ctx = ctx.clone();
        async move {
            let reports = generators::run_generators(&generators, graph, &ctx).await;
            print_reports(&reports);
            generators::summarize(&reports)
        }
    })
    .await
}

fn print_reports(reports: &[GeneratorReport]) {
    for report in reports {
        if report.is_ok() {
            println!(
                "OK: {} ({} written, {} skipped)",
                report.generator,
                report.written.len(),
                report.skipped.len()
            );
        } else {
            println!("FAILED: {}", report.generator);
            for e in &report.errors {
                eprintln!("  ERROR: {}", e);
            }
        }
    }
}

async fn cmd_bundle(args: &ProjectArgs) -> Result<()> {
    let project = load_project(args, &GeneratorRegistry::with_builtins()).await?;
    let graph = project.graph()?;
    let manifest = bundler::bundle(&graph, &project.ctx, Arc::clone(project.loader())).await?;
    for entry in &manifest.functions {
        println!("  {} {}", entry.entry.display(), entry.hash);
    }
    println!(
        "Bundled {} function(s) into {}",
        manifest.functions.len(),
        project.ctx.functions_dir().display()
    );
    Ok(())
}

async fn cmd_apply(args: &ProjectArgs, dry_run: bool) -> Result<()> {
    let project = load_project(args, &GeneratorRegistry::with_builtins()).await?;
    let graph = project.graph()?;
    let ctx = &project.ctx;
    let bundle = bundler::bundle(&graph, ctx, Arc::clone(project.loader())).await?;
    let manifest = platform::build_manifest(&graph, Some(&bundle), ctx.workspace_id.clone())?;

    let client = LocalStateClient::new(&ctx.state_file());
    let plan = platform::apply(&client, &manifest, dry_run, ctx.generator_timeout).await?;
    print_plan(&plan);

    if dry_run {
        println!("Dry run: no changes applied.");
    } else if plan.has_changes() {
        println!("Apply complete. State written to {}", client.path().display());
    }
    Ok(())
}

fn print_plan(plan: &DeploymentPlan) {
    println!("Planning: {} ({} resources)", plan.project, plan.changes.len());
    println!();
    for change in &plan.changes {
        println!("  {} {}", change.action, change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to delete, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_delete, plan.unchanged
    );
}

fn cmd_schema(output: Option<&Path>) -> Result<()> {
    let schema = schemars::schema_for!(RootConfig);
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| Error::Config(format!("cannot serialize schema: {}", e)))?;
    match output {
        Some(path) => {
            std::fs::write(path, json + "\n").map_err(|e| Error::io(path, e))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::project::fixtures;

    fn args(root: &Path) -> ProjectArgs {
        ProjectArgs {
            config: root.join(DEFAULT_CONFIG_FILE),
            output_dir: Some(root.join("out")),
        }
    }

    #[tokio::test]
    async fn test_init_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("my-shop");
        std::fs::create_dir_all(&sub).unwrap();
        dispatch(Commands::Init { path: sub.clone() }).await.unwrap();
        assert!(sub.join(DEFAULT_CONFIG_FILE).exists());
        assert!(sub.join("executors").is_dir());

        let config = std::fs::read_to_string(sub.join(DEFAULT_CONFIG_FILE)).unwrap();
        assert!(config.starts_with("name: my-shop\n"));
        dispatch(Commands::Validate { project: args(&sub) }).await.unwrap();
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_validate_reports_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::project(dir.path());
        fixtures::write(dir.path(), "db/dupe.yaml", "name: User\nfields: {}\n");
        let err = cmd_validate(&args(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("duplicate type 'User'"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_writes_all_builtins() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::project(dir.path());
        cmd_generate(&args(dir.path()), false, Duration::from_millis(10))
            .await
            .unwrap();
        let out = dir.path().join("out");
        assert!(out.join("types/storefront/main.ts").exists());
        assert!(out.join("kysely/storefront/main.ts").exists());
        assert!(out.join("schema/storefront.graphql").exists());
        assert!(out.join("migrations/storefront/main.sql").exists());
        assert!(out.join("seed/storefront/main/User.json").exists());
    }

    #[tokio::test]
    async fn test_bundle_command() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::project(dir.path());
        cmd_bundle(&args(dir.path())).await.unwrap();
        assert!(dir.path().join("out/functions/bundle.json").exists());
    }

    #[tokio::test]
    async fn test_apply_dry_run_then_real() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::project(dir.path());
        let state = dir.path().join("out/state.yaml");

        cmd_apply(&args(dir.path()), true).await.unwrap();
        assert!(!state.exists());

        cmd_apply(&args(dir.path()), false).await.unwrap();
        assert!(state.exists());
    }

    #[test]
    fn test_schema_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        cmd_schema(Some(&path)).unwrap();
        let schema: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(schema["title"], "RootConfig");
        assert!(schema["properties"]["applications"].is_object());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["tailor-sdk", "-v", "apply", "--dry-run", "-c", "x.yaml"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Apply { dry_run: true, .. }));
        Cli::command().debug_assert();
    }
}
