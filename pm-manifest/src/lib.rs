#![deny(missing_docs)]

//! Parsing and resolution for `project.packman.xml` and `config.packman.xml`
//! manifests.
//!
//! This crate owns the data model ([`model`]), the table-driven XML grammar
//! shared by both document kinds ([`xml`], [`parser`]), and the
//! platform/tag resolution pass that turns a declared [`model::Dependency`]
//! into a single concrete child for the running machine ([`resolver`]).
//! It knows nothing about the cache, the network, or the filesystem beyond
//! reading manifest files themselves; those concerns live in `pm-store`,
//! `pm-transport`, and `pm-core`.

pub mod editor;
pub mod errors;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod xml;

pub use editor::ManifestEditor;
pub use errors::{ManifestError, ManifestResult};
pub use parser::{parse_config, parse_project};
pub use resolver::{resolve, ResolvedDependency};
