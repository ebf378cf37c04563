//! Migration System
//!
//! Filename codec, artifact loading, catalog introspection, the version
//! ledger, the runner and the command façade that ties them together.

pub mod artifact;
pub mod command;
pub mod definitions;
pub mod filename;
pub mod introspect;
pub mod ledger;
pub mod manager;
pub mod runner;

pub use artifact::{ArtifactBody, MigrationArtifact};
pub use command::{ExecOutcome, MigrationCommand, Verb, VALID_VERBS};
pub use definitions::*;
pub use filename::{parse_kind, parse_version};
pub use introspect::CatalogIntrospector;
pub use ledger::Ledger;
pub use manager::MigrationManager;
pub use runner::MigrationRunner;
