//! Build context threaded through every pipeline stage.
//!
//! Holds the values that would otherwise be process-wide: project root,
//! output directory, frozen environment and workspace id. Resolved once at
//! the CLI entry point.

use crate::core::types::RootConfig;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const OUTPUT_DIR_ENV: &str = "TAILOR_SDK_OUTPUT_DIR";
pub const WORKSPACE_ID_ENV: &str = "TAILOR_PLATFORM_WORKSPACE_ID";
pub const DEFAULT_OUTPUT_DIR: &str = ".tailor-sdk";
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Directory containing the root config; globs resolve against it
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Values frozen into bundled functions
    pub env: IndexMap<String, String>,
    pub workspace_id: Option<String>,
    pub generator_timeout: Duration,
}

impl BuildContext {
    /// Resolve the context for `config`, located in `root_dir`.
    ///
    /// Output dir precedence: `output_override` > `TAILOR_SDK_OUTPUT_DIR` >
    /// `.tailor-sdk`. Relative output dirs are taken relative to `root_dir`.
    pub fn resolve(root_dir: &Path, config: &RootConfig, output_override: Option<&Path>) -> Self {
        let output = output_override
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(OUTPUT_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let workspace_id = config
            .workspace_id
            .clone()
            .or_else(|| std::env::var(WORKSPACE_ID_ENV).ok())
            .filter(|id| !id.is_empty());

        Self {
            root_dir: root_dir.to_path_buf(),
            output_dir: root_dir.join(output),
            env: config.env.clone(),
            workspace_id,
            generator_timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    /// Context with explicit paths and no environment lookups.
    pub fn new(root_dir: &Path, output_dir: &Path) -> Self {
        Self {
            root_dir: root_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            env: IndexMap::new(),
            workspace_id: None,
            generator_timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.generator_timeout = timeout;
        self
    }

    pub fn functions_dir(&self) -> PathBuf {
        self.output_dir.join("functions")
    }

    pub fn state_file(&self) -> PathBuf {
        self.output_dir.join("state.yaml")
    }
}
