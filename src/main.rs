//! tailor-sdk CLI: load, validate, generate, bundle and apply a project.

use clap::Parser;
use tailor_sdk::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "tailor_sdk=debug" } else { "tailor_sdk=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| tailor_sdk::Error::Config(format!("cannot start runtime: {}", e)))
        .and_then(|rt| rt.block_on(tailor_sdk::cli::dispatch(cli.command)));

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
