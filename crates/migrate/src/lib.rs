//! # strata-migrate: versioned schema migrations for PostgreSQL
//!
//! Applies and reverses migration files in version order, one transaction per
//! batch, and keeps a ledger table whose rows carry a fresh snapshot of the
//! catalog taken after every step.

pub mod backends;
pub mod cancel;
pub mod error;
pub mod lock;
pub mod migrations;
pub mod transaction;

#[cfg(test)]
mod testing;


pub use backends::{
    Connector, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue,
    PostgresConnector,
};
pub use cancel::CancellationToken;
pub use error::{FormatError, MigrationError, MigrationResult, UsageError};
pub use migrations::{
    ExecOutcome, Ledger, MigrationArtifact, MigrationCommand, MigrationConfig, MigrationKind,
    MigrationManager, MigrationRunner, Verb,
};
pub use transaction::TransactionGuard;
