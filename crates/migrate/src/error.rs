//! Error types for the migration engine
//!
//! Lower layers (filename codec, introspector, ledger) return these typed
//! errors unchanged; only the command façade converts panics into errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration file name does not follow the naming conventions
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The ledger holds no rows yet
    #[error("no migration has been recorded yet")]
    NotFound,

    /// A statement failed on the database
    #[error("Database error: {message}")]
    Database { message: String },

    /// Begin, commit or rollback failed
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Could not reach the database server
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The artifact discovery glob is malformed
    #[error("Invalid migration path pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("migration already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// A panic was recovered at the command boundary
    #[error("migration panicked: {message}")]
    Panicked { message: String },

    #[error("migration cancelled")]
    Cancelled,
}

impl MigrationError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error means "the ledger is empty"
    pub fn is_not_found(&self) -> bool {
        matches!(self, MigrationError::NotFound)
    }

    /// True for errors raised before any database work was attempted
    pub fn is_usage(&self) -> bool {
        matches!(self, MigrationError::Usage(_))
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => MigrationError::NotFound,
            other => MigrationError::database(other.to_string()),
        }
    }
}

/// Malformed migration file names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid version: {path}")]
    InvalidVersion { path: String },

    #[error("invalid migration kind '{segment}': {path}")]
    InvalidKind { path: String, segment: String },
}

/// Bad verbs or arguments, reported before a connection is opened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("invalid command: {command}. expect: [{expected}]")]
    InvalidCommand { command: String, expected: String },

    #[error("migration name is required")]
    MissingName,

    #[error("invalid limit '{value}': expected an integer")]
    InvalidLimit { value: String },
}
