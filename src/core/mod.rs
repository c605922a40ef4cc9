//! Core pipeline: config types, discovery, loading, validation, hashing.

pub mod discovery;
pub mod hasher;
pub mod loader;
pub mod output;
pub mod parser;
pub mod project;
pub mod resolver;
pub mod schema;
pub mod shapes;
pub mod types;
pub mod watch;
