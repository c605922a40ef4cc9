//! Root config parsing and validation.
//!
//! Parses `tailor.config.yaml` and validates structural constraints:
//! - Project and application names must be non-empty and unique
//! - Local db namespaces and resolver namespaces must declare files
//! - External db namespaces must not declare files or plugins
//! - Explicit auth namespaces must exist in the application
//! - Generator ids must be registered and not repeated

use super::types::RootConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "tailor.config.yaml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a root config file from disk.
pub fn parse_config_file(path: &Path) -> Result<RootConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| Error::load(path, e))
}

/// Parse a root config from a string.
pub fn parse_config(yaml: &str) -> Result<RootConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(format!("YAML parse error: {}", e)))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &RootConfig, known_generators: &[&str]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    let mut app_names = HashSet::new();
    for app in &config.applications {
        if app.name.trim().is_empty() {
            push("application name must not be empty".to_string());
        } else if !app_names.insert(app.name.as_str()) {
            push(format!("duplicate application '{}'", app.name));
        }

        for (ns, db) in &app.db {
            if db.external {
                if !db.files.is_empty() || !db.plugins.is_empty() {
                    push(format!(
                        "application '{}': external db namespace '{}' must not declare files or plugins",
                        app.name, ns
                    ));
                }
            } else if db.files.is_empty() {
                push(format!(
                    "application '{}': db namespace '{}' has no files",
                    app.name, ns
                ));
            }
        }

        for (ns, resolver) in &app.resolver {
            if resolver.files.is_empty() {
                push(format!(
                    "application '{}': resolver namespace '{}' has no files",
                    app.name, ns
                ));
            }
        }

        if let Some(auth) = &app.auth {
            let explicit = [
                ("user_profile", auth.user_profile.namespace.as_deref()),
                (
                    "tenant_provider",
                    auth.tenant_provider.as_ref().and_then(|t| t.namespace.as_deref()),
                ),
            ];
            for (what, namespace) in explicit {
                if let Some(ns) = namespace {
                    if !app.db.contains_key(ns) {
                        push(format!(
                            "application '{}': auth {} references unknown db namespace '{}'",
                            app.name, what, ns
                        ));
                    }
                }
            }
            if auth.user_profile.username_field.trim().is_empty() {
                push(format!(
                    "application '{}': auth username_field must not be empty",
                    app.name
                ));
            }
        }
    }

    if let Some(executor) = &config.executor {
        if executor.files.is_empty() {
            push("executor has no files".to_string());
        }
    }

    let mut seen = HashSet::new();
    for generator in &config.generators {
        let id = generator.id();
        if !known_generators.contains(&id) {
            push(format!(
                "unknown generator '{}' (known: {})",
                id,
                known_generators.join(", ")
            ));
        }
        if !seen.insert(id) {
            push(format!("generator '{}' listed more than once", id));
        }
    }

    errors
}
