//! Typed errors for the load → validate → generate → bundle pipeline.
//!
//! Fatal conditions are variants of [`Error`]. Non-fatal conditions (invalid
//! glob patterns, shape mismatches, unknown plugin ids) are logged where they
//! happen and never surface here.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::schema::{format_issues, Issue};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("duplicate {kind} '{name}' in namespace '{namespace}' (declared in {} and {})", first.display(), second.display())]
    Duplicate {
        kind: &'static str,
        name: String,
        namespace: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid config for plugin '{plugin}' on type '{type_name}':\n{}", format_issues(.issues))]
    PluginConfig {
        plugin: String,
        type_name: String,
        issues: Vec<Issue>,
    },

    #[error("plugin '{plugin}' failed on type '{type_name}': {message}")]
    Plugin {
        plugin: String,
        type_name: String,
        message: String,
    },

    #[error("relation error in type '{type_name}' ({}): {message}", path.display())]
    Relation {
        type_name: String,
        path: PathBuf,
        message: String,
    },

    #[error("namespace resolution: {0}")]
    Namespace(String),

    #[error("generator '{generator}': {message}")]
    Generator { generator: String, message: String },

    #[error("bundle '{name}': {message}")]
    Bundle { name: String, message: String },

    #[error("platform: {0}")]
    Platform(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("{} error(s):\n{}", .0.len(), format_errors(.0))]
    Multiple(Vec<Error>),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Collapse a list of errors: none → `Ok`, one → itself, several → `Multiple`.
    pub fn collect(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

fn format_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("  {}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("\n")
}
