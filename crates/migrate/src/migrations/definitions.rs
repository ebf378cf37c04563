//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the kinds, ledger records, baseline schema definitions and catalog
//! snapshots shared by the loader, ledger and runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version token of the baseline schema artifact
pub const BASELINE_VERSION: &str = "00000000000000";

/// Timestamp layout of generated version tokens
pub const VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

pub use strata_core::app_config::{DEFAULT_MIGRATIONS_GLOB, DEFAULT_MIGRATION_TABLE};
use strata_core::MigrationSettings;

/// Role of a migration artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// Full baseline definition, applied once and never reversed
    Schema,
    /// Forward change
    Up,
    /// Reversal of an `Up` change
    Down,
}

impl MigrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationKind::Schema => "schema",
            MigrationKind::Up => "up",
            MigrationKind::Down => "down",
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema" => Ok(MigrationKind::Schema),
            "up" => Ok(MigrationKind::Up),
            "down" => Ok(MigrationKind::Down),
            other => Err(format!("unknown migration kind: {}", other)),
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply the migration
    Up,
    /// Reverse the migration
    Down,
}

impl Direction {
    pub fn kind(&self) -> MigrationKind {
        match self {
            Direction::Up => MigrationKind::Up,
            Direction::Down => MigrationKind::Down,
        }
    }

    /// Tag used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

/// One row of the ledger table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub version: String,
    pub kind: MigrationKind,
    /// Full catalog snapshot captured when this version was recorded
    pub cache: Option<SchemaSnapshot>,
    /// Reserved, never written by the runner
    pub rollback_query: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Glob matching the migration files
    pub path_glob: String,
    /// Table name for the ledger
    pub table: String,
    /// Take a transaction-scoped advisory lock around each batch
    pub lock: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            path_glob: DEFAULT_MIGRATIONS_GLOB.to_string(),
            table: DEFAULT_MIGRATION_TABLE.to_string(),
            lock: true,
        }
    }
}

impl From<&MigrationSettings> for MigrationConfig {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            path_glob: settings.path_glob.clone(),
            table: settings.table.clone(),
            lock: settings.lock,
        }
    }
}

/// Result of running migrations up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Versions that were applied, in order
    pub applied_migrations: Vec<String>,
    /// Artifacts passed over because they were already recorded
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackResult {
    /// Versions that were reverted, newest first
    pub rolled_back_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Baseline schema as written in a schema-kind artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Default expression; scalars are rendered verbatim
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    /// Columns are NOT NULL unless this is set
    #[serde(default)]
    pub null: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDefinition {
    /// Rendered default expression, if one was given
    pub fn default_expression(&self) -> Option<String> {
        let rendered = match self.default.as_ref()? {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            _ => return None,
        };

        if rendered.trim().is_empty() {
            None
        } else {
            Some(rendered)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub foreign_key: Option<ForeignKeyDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub table: String,
    pub column: String,
}

/// Structural snapshot of the live catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSnapshot>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.iter().find(|table| table.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSnapshot>,
    pub indexes: Vec<IndexSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub name: String,
    pub definition: String,
    pub primary: bool,
    pub unique: bool,
}
