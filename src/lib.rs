//! tailor-sdk: a schema-driven application SDK.
//!
//! A project is a root config naming applications, each with database
//! namespaces, resolver namespaces and an optional auth service, plus a
//! project-wide executor service. The pipeline loads and validates every
//! declaration, runs plugins and code generators over the resulting
//! [`core::project::ProjectGraph`], bundles function bodies, and applies the
//! project to the platform through [`platform::PlatformClient`].

pub mod bundler;
pub mod cli;
pub mod context;
pub mod core;
pub mod error;
pub mod generators;
pub mod platform;
pub mod plugins;
pub mod services;

pub use context::BuildContext;
pub use error::{Error, Result};
